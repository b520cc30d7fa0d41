use relsheets_common::{ErrorKind, TableName};
use relsheets_eval::{EvalConfig, Sheet};

/// A = [1, 2], B = [3, absent].
fn sheet() -> Sheet {
    let mut sheet = Sheet::with_config(
        TableName::new("test", "foo"),
        EvalConfig::default().with_extra_column_rows(2),
    );
    sheet.add_column(None).unwrap();
    sheet.add_column(None).unwrap();
    sheet.set_cell(None, 0, 0, "1").unwrap();
    sheet.set_cell(None, 0, 1, "2").unwrap();
    sheet.set_cell(None, 1, 0, "3").unwrap();
    sheet
}

fn eval(sheet: &Sheet, formula: &str) -> String {
    sheet.evaluate(None, formula).unwrap().cell.value
}

fn fail(sheet: &Sheet, formula: &str) -> ErrorKind {
    sheet.evaluate(None, formula).unwrap_err().kind
}

#[test]
fn literal_formulas() {
    let sheet = sheet();
    assert_eq!(eval(&sheet, "=2+3"), "5");
    assert_eq!(eval(&sheet, "=2+2.5"), "4.5");
    assert_eq!(eval(&sheet, "=(2+2)*3"), "12");
    assert_eq!(eval(&sheet, "=IF(1=1,1,2)"), "1");
    assert_eq!(eval(&sheet, "=IF(1=0,1,2)"), "2");
}

#[test]
fn set_functions_over_extra_columns() {
    let sheet = sheet();
    assert_eq!(eval(&sheet, "=SUM(A1:A2)"), "3");
    assert_eq!(eval(&sheet, "=MAX(A1:A2,B1:B2)"), "3");
    assert_eq!(eval(&sheet, "=MIN(A1:A2,B1:B2)"), "1");
    assert_eq!(eval(&sheet, "=PRODUCT(A1:A2,B1)"), "6");
    assert_eq!(eval(&sheet, "=COUNTIF(A1:A2,\">1\")"), "1");
    assert_eq!(eval(&sheet, "=SUMIF(A1:A2,\">1\")"), "2");
    assert_eq!(eval(&sheet, "=AVERAGEIF(A1:A2,\">=1\")"), "1.5");
}

#[test]
fn open_ranges_and_averages() {
    let sheet = sheet();
    assert_eq!(eval(&sheet, "=SUM(A:A)"), "3");
    assert_eq!(eval(&sheet, "=SUM(A2:A)"), "2");
    assert_eq!(eval(&sheet, "=AVERAGE(A1:A2,B1)"), "2");
    assert_eq!(eval(&sheet, "=sum(A1:A2)"), "3");
    assert_eq!(eval(&sheet, "=SUM(B2:B9)"), "0");
    assert_eq!(fail(&sheet, "=AVERAGE(B2:B2)"), ErrorKind::Eval);
}

#[test]
fn criteria_ranges() {
    let sheet = sheet();
    assert_eq!(eval(&sheet, "=SUMIF(A1:A2,\"1\",B1:B2)"), "3");
    // the matching row has no value
    assert_eq!(eval(&sheet, "=SUMIF(A1:A2,\"2\",B1:B2)"), "0");
    assert_eq!(fail(&sheet, "=AVERAGEIF(A1:A2,\"2\",B1:B2)"), ErrorKind::Eval);
    assert_eq!(fail(&sheet, "=SUMIF(A1:A2,\">0\",B1:B3)"), ErrorKind::Resolution);
    assert_eq!(fail(&sheet, "=COUNTIF(A1:A2,\">0\",B1:B2)"), ErrorKind::Eval);
    assert_eq!(fail(&sheet, "=SUMIF(1,\">0\")"), ErrorKind::Eval);
}

#[test]
fn conditions() {
    let sheet = sheet();
    assert_eq!(eval(&sheet, "=IF(A1<A2,\"lt\",\"ge\")"), "lt");
    assert_eq!(eval(&sheet, "=IF(TRUE,1,2)"), "1");
    assert_eq!(eval(&sheet, "=IF(\"a\"<>\"b\",1,0)"), "1");
    assert_eq!(eval(&sheet, "=IF(REGEXMATCH(\"abc\",\"b\"),1,2)"), "1");
    assert_eq!(fail(&sheet, "=IF(1,1,2)"), ErrorKind::Eval);
    assert_eq!(fail(&sheet, "=IF(1=1=1,1,2)"), ErrorKind::Eval);
    assert_eq!(fail(&sheet, "=IF(\"a\"<1,1,2)"), ErrorKind::Eval);
    assert_eq!(fail(&sheet, "=IF(1=1,1)"), ErrorKind::Eval);
}

#[test]
fn untaken_branch_is_not_evaluated() {
    let sheet = sheet();
    assert_eq!(eval(&sheet, "=IF(1=1,1,NOPE(2))"), "1");
}

#[test]
fn regex_match() {
    let sheet = sheet();
    assert_eq!(eval(&sheet, "=REGEXMATCH(\"hello\",\"^h\")"), "true");
    assert_eq!(eval(&sheet, "=REGEXMATCH(\"hello\",\"^x\")"), "false");
    assert_eq!(fail(&sheet, "=REGEXMATCH(1,\"1\")"), ErrorKind::Eval);
    assert_eq!(fail(&sheet, "=REGEXMATCH(\"a\",\"(\")"), ErrorKind::Eval);
}

#[test]
fn mixed_expressions() {
    let sheet = sheet();
    assert_eq!(eval(&sheet, "=SUM(A1:A2)*2+MAX(1,B1)"), "9");
    assert_eq!(eval(&sheet, "=B2+1"), "1");
    assert_eq!(sheet.evaluate(None, "=A500").unwrap().cell.as_str(), None);
    assert_eq!(fail(&sheet, "=CONCAT(A1,B1)"), ErrorKind::Parse);
    assert_eq!(fail(&sheet, "=SUM(A1:B2)"), ErrorKind::Parse);
    assert_eq!(fail(&sheet, "=C1"), ErrorKind::Resolution);
}

#[test]
fn set_functions_over_empty_ranges() {
    let mut sheet = sheet();
    sheet.add_column(Some("e")).unwrap();
    assert_eq!(eval(&sheet, "=SUM(e1:e3)"), "0");
    assert_eq!(eval(&sheet, "=PRODUCT(e1:e3)"), "1");
    assert_eq!(eval(&sheet, "=MAX(e1:e3)"), "0");
    assert_eq!(eval(&sheet, "=MIN(e1:e3)"), "0");
    assert_eq!(eval(&sheet, "=PRODUCT(e1:e3,4)"), "4");
    assert_eq!(eval(&sheet, "=MIN(e1:e3,-2)"), "-2");
    assert_eq!(eval(&sheet, "=MAX(B2:B2)"), "0");
}

#[test]
fn empty_text_results_are_present() {
    let mut sheet = sheet();
    let column = sheet.add_column(Some("t")).unwrap();
    let cell = sheet.set_cell(None, column, 0, "=\"\"").unwrap();
    assert_eq!(cell.cell.as_str(), Some(""));
    assert_eq!(eval(&sheet, "=COUNTIF(t1:t2,\"\")"), "1");

    sheet.set_cell(None, column, 0, "").unwrap();
    assert_eq!(sheet.extra_columns()[column].cells[0].cell.as_str(), None);
    assert_eq!(eval(&sheet, "=COUNTIF(t1:t2,\"\")"), "0");
}
