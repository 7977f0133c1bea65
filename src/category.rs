//! Deterministic category classifier (C2).
//!
//! Ported from the design doc's per-source mapping tables
//! (`original_source/backend/data_pipeline/services/category_classifier.py`):
//! GDELT uses CAMEO root codes, World Bank/indicator sources use code
//! prefixes, commodity sources use HS 2-digit codes, and keyword sources
//! (trends, filings) match exact then substring.

use crate::event::{Category, Source};

/// CAMEO root (first two digits of the event code) → category.
fn gdelt_root_category(root: &str) -> Category {
    match root {
        "01" | "02" | "03" | "04" | "05" | "08" | "09" | "10" | "11" | "12" => Category::Political,
        "06" | "07" | "16" => Category::Economic,
        "13" | "17" | "18" | "19" | "20" => Category::Conflict,
        "14" => Category::Social,
        "15" => Category::Regulatory,
        _ => Category::Political,
    }
}

fn classify_gdelt(event_code: Option<&str>) -> (Category, Option<String>) {
    match event_code {
        Some(code) if !code.is_empty() => {
            let root: String = code.chars().take(2).collect();
            (gdelt_root_category(&root), Some(code.to_string()))
        }
        _ => (Category::Political, None),
    }
}

const WORLD_BANK_PREFIXES: &[(&str, Category)] = &[
    ("NY.GDP", Category::Economic),
    ("FP.CPI", Category::Economic),
    ("BX.KLT", Category::Economic),
    ("NE.EXP", Category::Trade),
    ("NE.IMP", Category::Trade),
    ("SH.", Category::Healthcare),
    ("EG.", Category::Energy),
    ("SP.POP", Category::Social),
    ("SE.", Category::Social),
    ("EN.", Category::Environmental),
    ("IS.", Category::Infrastructure),
];

fn classify_world_bank(indicator_code: Option<&str>) -> (Category, Option<String>) {
    let Some(code) = indicator_code.filter(|c| !c.is_empty()) else {
        return (Category::Economic, None);
    };
    for (prefix, category) in WORLD_BANK_PREFIXES {
        if code.starts_with(prefix) {
            return (*category, Some(code.to_string()));
        }
    }
    (Category::Economic, Some(code.to_string()))
}

/// Same prefix table drives FRED series classification (indicator-coded source).
fn classify_fred(series_id: Option<&str>) -> (Category, Option<String>) {
    let Some(id) = series_id.filter(|c| !c.is_empty()) else {
        return (Category::Economic, None);
    };
    // FRED series are economic time series by construction; EIA-prefixed
    // energy series are the one carve-out the design calls out.
    let category = if id.starts_with("DCOILWTICO") || id.starts_with("POILWTIUSDM") {
        Category::Energy
    } else {
        Category::Economic
    };
    (category, Some(id.to_string()))
}

const GOOGLE_TRENDS_KEYWORDS: &[(&str, Category)] = &[
    ("sanctions", Category::Regulatory),
    ("oil", Category::Energy),
    ("crisis", Category::Political),
    ("inflation", Category::Economic),
    ("protests", Category::Social),
    ("protest", Category::Social),
    ("blackout", Category::Infrastructure),
    ("gold", Category::Trade),
    ("military", Category::Conflict),
];

fn classify_keyword_table(term: Option<&str>, table: &[(&str, Category)]) -> (Category, Option<String>) {
    let Some(term) = term.filter(|t| !t.is_empty()) else {
        return (Category::Political, None);
    };
    let lower = term.to_lowercase();
    if let Some((_, category)) = table.iter().find(|(kw, _)| lower == *kw) {
        return (*category, Some(term.to_string()));
    }
    if let Some((_, category)) = table.iter().find(|(kw, _)| lower.contains(kw)) {
        return (*category, Some(term.to_string()));
    }
    (Category::Political, Some(term.to_string()))
}

const SEC_EDGAR_KEYWORDS: &[(&str, Category)] = &[
    ("sanction", Category::Regulatory),
    ("nationalization", Category::Regulatory),
    ("expropriation", Category::Regulatory),
    ("currency", Category::Economic),
    ("hyperinflation", Category::Economic),
    ("oil", Category::Energy),
    ("default", Category::Economic),
    ("debt", Category::Economic),
];

fn classify_sec_edgar(filing_text: Option<&str>) -> (Category, Option<String>) {
    // Open Question #2: filings adapter only needs to conform to C4 and emit
    // REGULATORY-category events; a keyword hit refines the subcategory but
    // never demotes the event out of REGULATORY.
    let (_, subcat) = classify_keyword_table(filing_text, SEC_EDGAR_KEYWORDS);
    (Category::Regulatory, subcat)
}

/// HS 2-digit commodity code → category.
fn classify_un_comtrade(hs2_code: Option<&str>) -> (Category, Option<String>) {
    let Some(code) = hs2_code.filter(|c| !c.is_empty()) else {
        return (Category::Trade, None);
    };
    let category = match code {
        "27" => Category::Energy,
        "71" | "26" => Category::Trade,
        _ => Category::Trade,
    };
    (category, Some(code.to_string()))
}

/// ReliefWeb carries its own disaster/report type taxonomy; humanitarian
/// updates map to SOCIAL unless the report explicitly flags conflict.
fn classify_reliefweb(report_type: Option<&str>) -> (Category, Option<String>) {
    let Some(rt) = report_type.filter(|t| !t.is_empty()) else {
        return (Category::Social, None);
    };
    let lower = rt.to_lowercase();
    let category = if lower.contains("conflict") || lower.contains("casualt") {
        Category::Conflict
    } else {
        Category::Social
    };
    (category, Some(rt.to_string()))
}

/// Entry point: classify `(category, subcategory)` for a source + its
/// native code/keyword field (§4.3).
pub fn classify(source: Source, native_field: Option<&str>) -> (Category, Option<String>) {
    match source {
        Source::Gdelt => classify_gdelt(native_field),
        Source::WorldBank => classify_world_bank(native_field),
        Source::Fred => classify_fred(native_field),
        Source::GoogleTrends => classify_keyword_table(native_field, GOOGLE_TRENDS_KEYWORDS),
        Source::SecEdgar => classify_sec_edgar(native_field),
        Source::UnComtrade => classify_un_comtrade(native_field),
        Source::Reliefweb => classify_reliefweb(native_field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gdelt_root_14_is_social() {
        assert_eq!(classify(Source::Gdelt, Some("140")).0, Category::Social);
    }

    #[test]
    fn gdelt_roots_13_17_20_are_conflict() {
        for code in ["130", "171", "182", "193", "204"] {
            assert_eq!(classify(Source::Gdelt, Some(code)).0, Category::Conflict);
        }
    }

    #[test]
    fn gdelt_missing_code_defaults_political() {
        assert_eq!(classify(Source::Gdelt, None).0, Category::Political);
    }

    #[test]
    fn world_bank_prefix_match() {
        assert_eq!(
            classify(Source::WorldBank, Some("NY.GDP.MKTP.CD")).0,
            Category::Economic
        );
        assert_eq!(classify(Source::WorldBank, Some("SH.DYN.MORT")).0, Category::Healthcare);
        assert_eq!(classify(Source::WorldBank, Some("EG.USE.PCAP.KG.OE")).0, Category::Energy);
    }

    #[test]
    fn un_comtrade_hs_codes() {
        assert_eq!(classify(Source::UnComtrade, Some("27")).0, Category::Energy);
        assert_eq!(classify(Source::UnComtrade, Some("71")).0, Category::Trade);
        assert_eq!(classify(Source::UnComtrade, Some("99")).0, Category::Trade);
    }

    #[test]
    fn google_trends_keyword_substring() {
        assert_eq!(
            classify(Source::GoogleTrends, Some("venezuela oil exports")).0,
            Category::Energy
        );
    }

    #[test]
    fn sec_edgar_always_regulatory() {
        assert_eq!(
            classify(Source::SecEdgar, Some("nationalization risk")).0,
            Category::Regulatory
        );
        assert_eq!(classify(Source::SecEdgar, None).0, Category::Regulatory);
    }
}
