use proptest::prelude::*;
use relsheets_sql::{escape_identifier, is_constant, make_filter_clause};

#[test]
fn classic_payloads_are_rejected() {
    for payload in [
        "\"foo\"; DROP TABLE users;--",
        "foo\" OR 1=1 --",
        "a.b\".c",
    ] {
        assert!(escape_identifier(payload).is_err(), "{payload}");
    }
}

proptest! {
    #[test]
    fn quotes_never_survive(ident in ".*\".*") {
        prop_assert!(escape_identifier(&ident).is_err());
    }

    #[test]
    fn escaping_only_adds_quotes(segments in prop::collection::vec("[^\".]{1,12}", 1..4)) {
        let ident = segments.join(".");
        let escaped = escape_identifier(&ident).unwrap();
        prop_assert_eq!(escaped.as_str().replace('"', ""), ident);
        prop_assert_eq!(escaped.as_str().matches('"').count(), segments.len() * 2);
    }

    #[test]
    fn filter_operands_are_constants_or_identifiers(operand in "[^\"]{1,20}") {
        if let Ok(clause) = make_filter_clause("col", &format!("= {operand}")) {
            let right = clause.as_str().trim_start_matches("\"col\" = ");
            prop_assert!(
                is_constant(right)
                    || (right.starts_with('"') && right.ends_with('"'))
            );
        }
    }
}
