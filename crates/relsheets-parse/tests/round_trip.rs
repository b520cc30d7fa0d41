use proptest::prelude::*;
use relsheets_parse::{RangeRef, to_formula, tokenize, translate_tokens};

#[test]
fn known_formulas_round_trip() {
    for formula in [
        "=SUM(A:A)",
        "1+(2)",
        "=1+(2+3)",
        "=REGEXMATCH(A,\"foo\")",
        "=IF(A1>=2, \"big\", \"small\")",
        "=SUMIF(bar:bar,\"=3\",baz:baz)",
        "=-test.foo.bar1*(2.5+B3)",
        "plain text",
        "",
    ] {
        let tokens = tokenize(formula).unwrap();
        assert_eq!(to_formula(&tokens), formula, "{formula}");
    }
}

fn reference() -> impl Strategy<Value = String> {
    let column = prop::sample::select(vec!["A", "B", "AA", "bar", "test.foo.baz"]);
    (column, 1u32..500, prop::option::of(0u32..50)).prop_map(|(col, row, span)| match span {
        Some(len) => format!("{col}{row}:{col}{}", row + len),
        None => format!("{col}{row}"),
    })
}

fn operand() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u32..10_000).prop_map(|n| n.to_string()),
        (0u32..100, 1u32..100).prop_map(|(a, b)| format!("{a}.{b}")),
        "[a-z ]{0,6}".prop_map(|s| format!("\"{s}\"")),
        reference(),
    ]
}

fn expression() -> impl Strategy<Value = String> {
    operand().prop_recursive(4, 32, 4, |inner| {
        let op = prop::sample::select(vec!["+", "-", "*", "/", "=", "<", "<=", ">", ">=", "<>"]);
        let func = prop::sample::select(vec!["SUM", "MAX", "IF", "COUNTIF", "REGEXMATCH"]);
        prop_oneof![
            (inner.clone(), op, inner.clone()).prop_map(|(l, o, r)| format!("{l}{o}{r}")),
            inner.clone().prop_map(|e| format!("({e})")),
            inner.clone().prop_map(|e| format!("-{e}")),
            (func, prop::collection::vec(inner, 1..4))
                .prop_map(|(f, args)| format!("{f}({})", args.join(","))),
        ]
    })
}

proptest! {
    #[test]
    fn tokenize_then_render_is_identity(expr in expression()) {
        let formula = format!("={expr}");
        let tokens = tokenize(&formula).unwrap();
        prop_assert_eq!(to_formula(&tokens), formula);
    }

    #[test]
    fn translation_is_reversible(expr in expression(), offset in 0i64..100) {
        let tokens = tokenize(&format!("={expr}")).unwrap();
        let down = translate_tokens(&tokens, offset).unwrap();
        let back = translate_tokens(&down, -offset).unwrap();
        prop_assert_eq!(to_formula(&back), to_formula(&tokens));
    }

    #[test]
    fn references_render_as_parsed(text in reference()) {
        let parsed = RangeRef::parse(&text).unwrap();
        prop_assert_eq!(parsed.to_string(), text);
    }
}
