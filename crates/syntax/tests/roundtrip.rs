//! Round-trip property over a corpus of realistic resources

use ftl_syntax::parser::parse;
use ftl_syntax::serializer::serialize;

fn roundtrip(source: &str) {
    let first = parse(source);
    let text = serialize(&first).unwrap();
    let second = parse(&text);
    assert_eq!(
        first.strip_spans(),
        second.strip_spans(),
        "round-trip failed for:\n{source}\n--- serialized ---\n{text}"
    );
}

#[test]
fn roundtrip_realistic_resource() {
    roundtrip(
        r#"### Application strings
## Menu

-brand = Notepad
    .gender = neuter

# Shown in the title bar
window-title = { -brand } — { $file }

menu-open = Open…
    .accesskey = O
menu-save-as = Save { $file } as…

items-selected = { $count ->
    [0] Nothing selected
    [one] One item selected
   *[other] { NUMBER($count, useGrouping: 1) } items selected
}

bytes = { NUMBER($size, maximumFractionDigits: 1) } bytes
updated = Updated { DATETIME($when, dateStyle: "medium") }

help =
    Multi-line help text
    continues on this line.

        And keeps deeper indentation.
"#,
    );
}

#[test]
fn roundtrip_terms_with_parameters() {
    roundtrip(
        r#"-thing = { $case ->
   *[nominative] thing
    [genitive] thing's
}
possessive = The { -thing(case: "genitive") } color
"#,
    );
}

#[test]
fn roundtrip_junk_preserved() {
    roundtrip("good-one = fine\n== broken line ==\ngood-two = also fine\n");
}

#[test]
fn roundtrip_escapes() {
    roundtrip(r#"quote = { "She said \"hi\"" }"#);
    roundtrip(r#"unicode = { "A\U01F602" }"#);
}

#[test]
fn roundtrip_empty_and_blank() {
    roundtrip("");
    roundtrip("\n\n\n");
    roundtrip("only = entry\n\n\n");
}

#[test]
fn parser_is_total_on_garbage() {
    // No input may panic or error through the convenience front-end.
    let nasty = [
        "{",
        "}",
        "= no id",
        "m = { $",
        "m = { NUMBER( }",
        "-=x",
        "m = { a ->\n*[b] }",
        ".attr = orphan",
        "\u{0000}\u{FFFF}",
        "m = \"unterminated",
    ];
    for source in nasty {
        let _ = parse(source);
    }
}
