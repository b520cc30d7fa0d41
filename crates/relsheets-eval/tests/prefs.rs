use relsheets_common::TableName;
use relsheets_eval::{ColumnPref, EvalConfig, Sheet, SheetColumn};

#[test]
fn stored_prefs_fill_in_missing_fields() {
    let pref: ColumnPref = serde_json::from_str(r#"{"hide": true, "filter": ">= 3"}"#).unwrap();
    assert!(pref.hide);
    assert!(!pref.sort_on);
    assert_eq!(pref.index, None);
    assert_eq!(pref.filter.as_deref(), Some(">= 3"));
}

#[test]
fn extra_columns_keep_formulas_and_absent_cells() {
    let mut sheet = Sheet::with_config(
        TableName::new("test", "foo"),
        EvalConfig::default().with_extra_column_rows(2),
    );
    sheet.add_column(Some("total")).unwrap();
    sheet.set_cell(None, 0, 0, "=1+1").unwrap();

    let json = serde_json::to_value(&sheet.extra_columns()[0]).unwrap();
    assert_eq!(json["name"], "total");
    assert_eq!(json["cells"][0]["formula"], "=1+1");
    assert_eq!(json["cells"][0]["cell"]["value"], "2");
    assert_eq!(json["cells"][1]["cell"]["present"], false);

    let column: SheetColumn = serde_json::from_value(json).unwrap();
    assert_eq!(&column, &sheet.extra_columns()[0]);
}
