//! Golden template cases: description / template / globals / expected
//! output, grouped per tag and filter family.

use pretty_assertions::assert_eq;
use tidal::{Environment, Globals};

struct Case {
    description: &'static str,
    template: &'static str,
    globals: &'static str,
    expect: &'static str,
}

const fn case(
    description: &'static str,
    template: &'static str,
    globals: &'static str,
    expect: &'static str,
) -> Case {
    Case { description, template, globals, expect }
}

fn check(cases: &[Case]) {
    let env = Environment::default();
    for case in cases {
        let globals = Globals::from_json(case.globals).expect(case.description);
        let result = env.render_str(case.template, &globals);
        match result {
            Ok(output) => assert_eq!(output, case.expect, "{}", case.description),
            Err(err) => panic!("{}: unexpected error: {err}", case.description),
        }
    }
}

#[test]
fn output_statements() {
    check(&[
        case("string variable", "{{ greeting }}", r#"{"greeting": "Hello"}"#, "Hello"),
        case("integer literal", "{{ 42 }}", "{}", "42"),
        case("float keeps its decimal point", "{{ 1.5 }}", "{}", "1.5"),
        case("boolean renders lowercase", "{{ true }}", "{}", "true"),
        case("nil renders empty", "a{{ nil }}b", "{}", "ab"),
        case("undefined renders empty", "a{{ nosuch }}b", "{}", "ab"),
        case(
            "dotted access",
            "{{ product.title }}",
            r#"{"product": {"title": "shirt"}}"#,
            "shirt",
        ),
        case(
            "bracketed access through a variable",
            "{{ a[b] }}",
            r#"{"a": {"x": 7}, "b": "x"}"#,
            "7",
        ),
        case("array index", "{{ tags[1] }}", r#"{"tags": ["a", "b"]}"#, "b"),
        case(
            "negative index through a variable",
            "{{ tags[n] }}",
            r#"{"tags": ["a", "b"], "n": -1}"#,
            "b",
        ),
        case("size property", "{{ tags.size }}", r#"{"tags": ["a", "b"]}"#, "2"),
        case(
            "first and last properties",
            "{{ tags.first }}{{ tags.last }}",
            r#"{"tags": ["a", "b"]}"#,
            "ab",
        ),
        case("string subscript", "{{ greeting[1] }}", r#"{"greeting": "Hello"}"#, "e"),
        case("echo tag", "{% echo greeting %}", r#"{"greeting": "Hello"}"#, "Hello"),
        case("prefix minus", "{{ -n }}", r#"{"n": 5}"#, "-5"),
        case(
            "deeply nested subscript",
            "{{ a[b.c] }}",
            r#"{"a": {"k": "v"}, "b": {"c": "k"}}"#,
            "v",
        ),
    ]);
}

#[test]
fn whitespace_control() {
    check(&[
        case("trim both sides of an output", "a  {{- 'b' -}}  c", "{}", "abc"),
        case(
            "trim around tags",
            "a\n{%- if true -%}\n\tb\n{%- endif -%}\nc",
            "{}",
            "abc",
        ),
        case("no trimming without markers", "a {{ 'b' }} c", "{}", "a b c"),
    ]);
}

#[test]
fn raw_and_comments() {
    check(&[
        case("raw passes markup through", "{% raw %}{{ not parsed }}{% endraw %}", "{}", "{{ not parsed }}"),
        case(
            "block comments vanish",
            "a{% comment %}ignored {{ x }} {% if %}{% endcomment %}b",
            "{}",
            "ab",
        ),
        case("inline comments vanish", "a{% # note to self %}b", "{}", "ab"),
    ]);
}

#[test]
fn if_tag() {
    check(&[
        case("elsif chain", "{% if false %}a{% elsif true %}b{% else %}c{% endif %}", "{}", "b"),
        case("else branch", "{% if false %}a{% else %}b{% endif %}", "{}", "b"),
        case("zero is truthy", "{% if 0 %}yes{% endif %}", "{}", "yes"),
        case("empty string is truthy", "{% if '' %}yes{% endif %}", "{}", "yes"),
        case("nil is falsy", "{% if nil %}a{% else %}b{% endif %}", "{}", "b"),
        case("undefined is falsy", "{% if nosuch %}a{% else %}b{% endif %}", "{}", "b"),
        case("less than", "{% if 1 < 2 %}yes{% endif %}", "{}", "yes"),
        case("greater or equal", "{% if 2 >= 2 %}yes{% endif %}", "{}", "yes"),
        case(
            "string never equals integer",
            "{% if '1' == 1 %}a{% else %}b{% endif %}",
            "{}",
            "b",
        ),
        case("not equal spelled both ways", "{% if 1 != 2 and 1 <> 2 %}yes{% endif %}", "{}", "yes"),
        case("string contains", "{% if 'hello' contains 'ell' %}yes{% endif %}", "{}", "yes"),
        case(
            "array contains",
            "{% if tags contains 'b' %}yes{% endif %}",
            r#"{"tags": ["a", "b"]}"#,
            "yes",
        ),
        case(
            "hash contains key",
            "{% if product contains 'title' %}yes{% endif %}",
            r#"{"product": {"title": "shirt"}}"#,
            "yes",
        ),
        case(
            "empty matches an empty array",
            "{% if tags == empty %}e{% else %}n{% endif %}",
            r#"{"tags": []}"#,
            "e",
        ),
        case(
            "boolean operators are right associative",
            "{% if true or false and false %}yes{% else %}no{% endif %}",
            "{}",
            "yes",
        ),
        case(
            "undefined equals nil",
            "{% if nosuch == nil %}yes{% endif %}",
            "{}",
            "yes",
        ),
    ]);
}

#[test]
fn unless_tag() {
    check(&[
        case("falsy condition renders the body", "{% unless false %}a{% endunless %}", "{}", "a"),
        case("truthy condition skips the body", "{% unless true %}a{% endunless %}", "{}", ""),
        case("unless with else", "{% unless true %}a{% else %}b{% endunless %}", "{}", "b"),
        case(
            "unless with elsif",
            "{% unless true %}a{% elsif true %}b{% else %}c{% endunless %}",
            "{}",
            "b",
        ),
    ]);
}

#[test]
fn case_tag() {
    check(&[
        case(
            "single match",
            "{% case x %}{% when 'a' %}1{% when 'b' %}2{% endcase %}",
            r#"{"x": "b"}"#,
            "2",
        ),
        case(
            "every matching when fires",
            "{% case 2 %}{% when 1 %}a{% when 2 %}b{% when 2 %}c{% else %}d{% endcase %}",
            "{}",
            "bc",
        ),
        case(
            "else fires only when nothing matched",
            "{% case 9 %}{% when 1 %}a{% when 2 %}b{% else %}d{% endcase %}",
            "{}",
            "d",
        ),
        case(
            "comma separated candidates",
            "{% case x %}{% when 'a', 'b' %}ab{% endcase %}",
            r#"{"x": "b"}"#,
            "ab",
        ),
        case(
            "or separated candidates",
            "{% case x %}{% when 'a' or 'b' %}ab{% endcase %}",
            r#"{"x": "a"}"#,
            "ab",
        ),
        case(
            "no match and no else renders nothing",
            "-{% case 9 %}{% when 1 %}a{% endcase %}-",
            "{}",
            "--",
        ),
    ]);
}

#[test]
fn assign_and_capture() {
    check(&[
        case("simple assignment", "{% assign x = 1 %}{{ x }}", "{}", "1"),
        case(
            "assignment with filters",
            "{% assign x = 'a b' | split: ' ' %}{{ x | join: '-' }}",
            "{}",
            "a-b",
        ),
        case("reassignment wins", "{% assign x = 1 %}{% assign x = 2 %}{{ x }}", "{}", "2"),
        case("capture binds rendered output", "{% capture c %}x{{ 1 }}y{% endcapture %}{{ c }}", "{}", "x1y"),
        case(
            "capture result is a string",
            "{% capture c %}2{% endcapture %}{% if c == '2' %}str{% endif %}",
            "{}",
            "str",
        ),
    ]);
}

#[test]
fn counters_and_cycles() {
    check(&[
        case("increment yields then bumps", "{% increment c %}-{% increment c %}-{% increment c %}", "{}", "0-1-2"),
        case("decrement bumps then yields", "{% decrement c %}-{% decrement c %}", "{}", "-1--2"),
        case("increment and decrement share a counter", "{% increment c %}{% increment c %}{% decrement c %}", "{}", "011"),
        case(
            "counters are independent of locals",
            "{% assign n = 5 %}{% increment n %}{{ n }}",
            "{}",
            "05",
        ),
        case(
            "cycle without a group",
            "{% for i in (1..4) %}{% cycle 'a', 'b', 'c' %}{% endfor %}",
            "{}",
            "abca",
        ),
        case(
            "named groups are independent",
            "{% cycle 'g': 'a', 'b' %}{% cycle 'h': 'x', 'y' %}{% cycle 'g': 'a', 'b' %}",
            "{}",
            "axb",
        ),
        case(
            "ungrouped cycles key on their arguments",
            "{% cycle '1', '2' %}{% cycle 'x', 'y' %}{% cycle '1', '2' %}",
            "{}",
            "1x2",
        ),
    ]);
}

#[test]
fn for_tag() {
    check(&[
        case("simple range loop", "{% for i in (0..3) %}{{ i }} {% endfor %}", "{}", "0 1 2 3 "),
        case(
            "range loop using an identifier bound",
            "{% for i in (0..product.end_range) %}{{ i }} - {{ product.tags[i] }} {% endfor %}",
            r#"{"product": {"tags": ["sports", "garden"], "end_range": 1}}"#,
            "0 - sports 1 - garden ",
        ),
        case(
            "simple array loop",
            "{% for tag in product.tags %}{{ tag }} {% endfor %}",
            r#"{"product": {"tags": ["sports", "garden"]}}"#,
            "sports garden ",
        ),
        case(
            "reversed",
            "{% for tag in product.tags reversed %}{{ tag }} {% endfor %}",
            r#"{"product": {"tags": ["sports", "garden"]}}"#,
            "garden sports ",
        ),
        case(
            "hash loop yields key value pairs",
            "{% for c in collection %}{{ c[0] }} {{ c[1] }} {% endfor %}",
            r#"{"collection": {"title": "foo", "description": "bar"}}"#,
            "title foo description bar ",
        ),
        case(
            "empty array renders the else block",
            "{% for img in things.array %}{{ img.url }} {% else %}no images{% endfor %}",
            r#"{"things": {"array": []}}"#,
            "no images",
        ),
        case(
            "undefined source renders the else block",
            "{% for x in nothing %}a{% else %}none{% endfor %}",
            "{}",
            "none",
        ),
        case(
            "descending range is empty",
            "{% for i in (3..1) %}{{ i }}{% else %}empty{% endfor %}",
            "{}",
            "empty",
        ),
        case(
            "else is skipped when items exist",
            "{% for i in (1..2) %}{{ i }}{% else %}none{% endfor %}",
            "{}",
            "12",
        ),
        case("offset and limit window", "{% for i in (1..6) limit:2 offset:2 %}{{ i }} {% endfor %}", "{}", "3 4 "),
        case("limit then reverse", "{% for i in (1..6) reversed limit:2 %}{{ i }}{% endfor %}", "{}", "21"),
        case(
            "string sources loop once",
            "{% for c in 'hello' %}{{ c }}-{% endfor %}",
            "{}",
            "hello-",
        ),
        case(
            "forloop counters",
            "{% for i in (1..3) %}{{ forloop.index }}{{ forloop.index0 }}{{ forloop.rindex }}{{ forloop.rindex0 }} {% endfor %}",
            "{}",
            "1032 2121 3210 ",
        ),
        case(
            "forloop first and last",
            "{% for i in (1..3) %}{% if forloop.first %}F{% endif %}{% if forloop.last %}L{% endif %}{{ i }}{% endfor %}",
            "{}",
            "F123L",
        ),
        case(
            "forloop length",
            "{% for i in (1..3) %}{{ forloop.length }}{% endfor %}",
            "{}",
            "333",
        ),
        case(
            "forloop name identifies the loop",
            "{% for i in (1..2) %}{{ forloop.name }} {% endfor %}",
            "{}",
            "i-(1..2) i-(1..2) ",
        ),
        case(
            "parentloop links to the enclosing for",
            "{% for a in (1..2) %}{% for b in (1..2) %}{{ forloop.parentloop.index }}{{ b }}{% endfor %}{% endfor %}",
            "{}",
            "11122122",
        ),
        case(
            "missing parentloop is undefined",
            "{% for i in (1..1) %}[{{ forloop.parentloop }}]{% endfor %}",
            "{}",
            "[]",
        ),
        case(
            "break stops the loop",
            "{% for i in (1..5) %}{% if i == 3 %}{% break %}{% endif %}{{ i }}{% endfor %}",
            "{}",
            "12",
        ),
        case(
            "continue skips the rest of the body",
            "{% for i in (1..3) %}{% if i == 2 %}{% continue %}{% endif %}{{ i }}{% endfor %}",
            "{}",
            "13",
        ),
        case(
            "break only exits the innermost loop",
            "{% for a in (1..2) %}{% for b in (1..9) %}{% if b == 2 %}{% break %}{% endif %}{{ a }}{{ b }} {% endfor %}{% endfor %}",
            "{}",
            "11 21 ",
        ),
        case(
            "assignment inside a loop escapes it",
            "{% for i in (1..3) %}{% assign last_seen = i %}{% endfor %}{{ last_seen }}",
            "{}",
            "3",
        ),
        case(
            "loop variable shadows an outer binding inside the body",
            "{% assign i = 'outer' %}{% for i in (1..2) %}{{ i }}{% endfor %}{{ i }}",
            "{}",
            "12outer",
        ),
    ]);
}

#[test]
fn tablerow_tag() {
    check(&[
        case(
            "two columns over four items",
            "{% tablerow i in (1..4) cols:2 %}{{ i }}{% endtablerow %}",
            "{}",
            "<tr class=\"row1\">\n<td class=\"col1\">1</td><td class=\"col2\">2</td></tr>\n<tr class=\"row2\"><td class=\"col1\">3</td><td class=\"col2\">4</td></tr>\n",
        ),
        case(
            "cols defaults to everything in one row",
            "{% tablerow i in (1..2) %}{{ i }}{% endtablerow %}",
            "{}",
            "<tr class=\"row1\">\n<td class=\"col1\">1</td><td class=\"col2\">2</td></tr>\n",
        ),
        case(
            "tablerowloop column state",
            "{% tablerow i in (1..4) cols:2 %}{{ tablerowloop.col }}{{ tablerowloop.row }}{% endtablerow %}",
            "{}",
            "<tr class=\"row1\">\n<td class=\"col1\">11</td><td class=\"col2\">21</td></tr>\n<tr class=\"row2\"><td class=\"col1\">12</td><td class=\"col2\">22</td></tr>\n",
        ),
    ]);
}

#[test]
fn string_filters() {
    check(&[
        case("append", "{{ 'hello' | append: ' world' }}", "{}", "hello world"),
        case("append coerces its argument", "{{ 'v' | append: 2 }}", "{}", "v2"),
        case("prepend", "{{ 'world' | prepend: 'hello ' }}", "{}", "hello world"),
        case("capitalize", "{{ 'hello World' | capitalize }}", "{}", "Hello world"),
        case("downcase", "{{ 'HELLO' | downcase }}", "{}", "hello"),
        case("upcase", "{{ 'hello' | upcase }}", "{}", "HELLO"),
        case("escape", "{{ '<p>test</p>' | escape }}", "{}", "&lt;p&gt;test&lt;/p&gt;"),
        case(
            "escape_once leaves entities alone",
            "{{ '&lt;p&gt; <b>' | escape_once }}",
            "{}",
            "&lt;p&gt; &lt;b&gt;",
        ),
        case("lstrip", "{{ '  hi  ' | lstrip }}!", "{}", "hi  !"),
        case("rstrip", "{{ '  hi  ' | rstrip }}!", "{}", "  hi!"),
        case("strip", "{{ '  hi  ' | strip }}!", "{}", "hi!"),
        case("newline_to_br", "{{ 'a\nb' | newline_to_br }}", "{}", "a<br />\nb"),
        case("remove", "{{ 'aXbXc' | remove: 'X' }}", "{}", "abc"),
        case("remove_first", "{{ 'aXbXc' | remove_first: 'X' }}", "{}", "abXc"),
        case("replace", "{{ 'aXbXc' | replace: 'X', '-' }}", "{}", "a-b-c"),
        case("replace_first", "{{ 'aXbXc' | replace_first: 'X', '-' }}", "{}", "a-bXc"),
        case("slice with length", "{{ 'hello' | slice: 1, 3 }}", "{}", "ell"),
        case("slice default length is one", "{{ 'hello' | slice: 1 }}", "{}", "e"),
        case("slice from the end", "{{ 'hello' | slice: -3, 2 }}", "{}", "ll"),
        case("split and index", "{{ 'a~b~c' | split: '~' | last }}", "{}", "c"),
        case("split on empty separator yields characters", "{{ 'abc' | split: '' | join: '.' }}", "{}", "a.b.c"),
        case(
            "strip_html",
            "{{ '<p>hi</p><script>var x;</script><!-- note -->there' | strip_html }}",
            "{}",
            "hithere",
        ),
        case("strip_newlines", "{{ 'a\nb\r\nc' | strip_newlines }}", "{}", "abc"),
        case(
            "truncate counts the ellipsis",
            "{{ 'Ground control to Major Tom.' | truncate: 20 }}",
            "{}",
            "Ground control to...",
        ),
        case("truncate with a custom end", "{{ 'Ground control' | truncate: 8, '' }}", "{}", "Ground c"),
        case(
            "truncatewords",
            "{{ 'Ground control to Major Tom.' | truncatewords: 3 }}",
            "{}",
            "Ground control to...",
        ),
        case("truncatewords leaves short input alone", "{{ 'a b' | truncatewords: 3 }}", "{}", "a b"),
        case(
            "url_encode",
            "{{ 'email address is bob@example.com!' | url_encode }}",
            "{}",
            "email+address+is+bob%40example.com%21",
        ),
        case("url_decode", "{{ '%27quoted%27+here' | url_decode }}", "{}", "'quoted' here"),
        case("filters chain left to right", "{{ ' hi ' | strip | upcase | append: '!' }}", "{}", "HI!"),
        case("string filters coerce numbers", "{{ 7 | append: '!' }}", "{}", "7!"),
    ]);
}

#[test]
fn array_filters() {
    check(&[
        case("join with default separator", "{{ tags | join }}", r#"{"tags": ["a", "b"]}"#, "a b"),
        case("join with separator", "{{ tags | join: '#' }}", r#"{"tags": ["a", "b"]}"#, "a#b"),
        case("first", "{{ tags | first }}", r#"{"tags": ["a", "b"]}"#, "a"),
        case("last", "{{ tags | last }}", r#"{"tags": ["a", "b"]}"#, "b"),
        case("first of empty is nil", "[{{ tags | first }}]", r#"{"tags": []}"#, "[]"),
        case(
            "concat",
            "{{ a | concat: b | join: ',' }}",
            r#"{"a": [1, 2], "b": [3]}"#,
            "1,2,3",
        ),
        case(
            "map extracts a property",
            "{{ products | map: 'title' | join: ',' }}",
            r#"{"products": [{"title": "a"}, {"title": "b"}]}"#,
            "a,b",
        ),
        case("reverse", "{{ tags | reverse | join: ',' }}", r#"{"tags": ["a", "b", "c"]}"#, "c,b,a"),
        case("sort numbers", "{{ nums | sort | join: ',' }}", r#"{"nums": [3, 1, 2]}"#, "1,2,3"),
        case(
            "sort by key puts missing keys last",
            "{{ items | sort: 'w' | map: 'n' | join: ',' }}",
            r#"{"items": [{"n": "a", "w": 2}, {"n": "b"}, {"n": "c", "w": 1}]}"#,
            "c,a,b",
        ),
        case(
            "sort_natural ignores case",
            "{{ tags | sort_natural | join: ',' }}",
            r#"{"tags": ["b", "A", "C"]}"#,
            "A,b,C",
        ),
        case(
            "where with a value",
            "{{ products | where: 'type', 'shirt' | map: 'title' | join: ',' }}",
            r#"{"products": [{"title": "a", "type": "shirt"}, {"title": "b", "type": "pants"}]}"#,
            "a",
        ),
        case(
            "where without a value keeps truthy properties",
            "{{ products | where: 'available' | map: 'title' | join: ',' }}",
            r#"{"products": [{"title": "a", "available": true}, {"title": "b", "available": false}, {"title": "c"}]}"#,
            "a",
        ),
        case("uniq preserves first occurrences", "{{ tags | uniq | join: ',' }}", r#"{"tags": ["a", "b", "a", "c", "b"]}"#, "a,b,c"),
        case("compact drops nils", "{{ vals | compact | join: ',' }}", r#"{"vals": [1, null, 2, null]}"#, "1,2"),
        case("sum of integers", "{{ nums | sum }}", r#"{"nums": [1, 2, 3]}"#, "6"),
        case(
            "sum by property",
            "{{ items | sum: 'qty' }}",
            r#"{"items": [{"qty": 2}, {"qty": 3}]}"#,
            "5",
        ),
        case("ranges feed array filters", "{{ (1..4) | join: '-' }}", "{}", "1-2-3-4"),
        case("undefined acts as an empty array", "[{{ nosuch | join: ',' }}]", "{}", "[]"),
    ]);
}

#[test]
fn math_filters() {
    check(&[
        case("abs of a negative", "{{ -5 | abs }}", "{}", "5"),
        case("abs of a numeric string", "{{ '-5.5' | abs }}", "{}", "5.5"),
        case("at_most", "{{ 8 | at_most: 5 }}", "{}", "5"),
        case("at_least", "{{ 3 | at_least: 5 }}", "{}", "5"),
        case("ceil", "{{ 5.4 | ceil }}", "{}", "6"),
        case("floor", "{{ 5.6 | floor }}", "{}", "5"),
        case("integer division floors", "{{ 10 | divided_by: 3 }}", "{}", "3"),
        case("float division is exact", "{{ 10 | divided_by: 4.0 }}", "{}", "2.5"),
        case("plus", "{{ 10 | plus: 2 }}", "{}", "12"),
        case("plus with a float", "{{ 10 | plus: 2.5 }}", "{}", "12.5"),
        case("minus", "{{ 10 | minus: 2 }}", "{}", "8"),
        case("times", "{{ 6 | times: 7 }}", "{}", "42"),
        case("modulo", "{{ 10 | modulo: 3 }}", "{}", "1"),
        case("round to an integer", "{{ 4.6 | round }}", "{}", "5"),
        case("round to digits", "{{ 4.5612 | round: 2 }}", "{}", "4.56"),
        case("non-numeric input counts as zero", "{{ 'abc' | plus: 1 }}", "{}", "1"),
        case("numeric strings coerce", "{{ '10' | plus: '2' }}", "{}", "12"),
    ]);
}

#[test]
fn misc_filters() {
    check(&[
        case("size of a string", "{{ 'hello' | size }}", "{}", "5"),
        case("size of an array", "{{ tags | size }}", r#"{"tags": ["a", "b"]}"#, "2"),
        case("size of undefined is zero", "{{ nosuch | size }}", "{}", "0"),
        case("default on undefined", "{{ nosuch | default: 'x' }}", "{}", "x"),
        case("default on empty string", "{{ '' | default: 'x' }}", "{}", "x"),
        case("default on false", "{{ false | default: 'x' }}", "{}", "x"),
        case("default with allow_false", "{{ false | default: 'x', allow_false: true }}", "{}", "false"),
        case("default passes zero through", "{{ 0 | default: 'x' }}", "{}", "0"),
        case(
            "date formats a parsed date",
            "{{ 'March 14, 2016' | date: '%b %d, %y' }}",
            "{}",
            "Mar 14, 16",
        ),
        case(
            "date formats a timestamp",
            "{{ 1152098955 | date: '%Y-%m-%d' }}",
            "{}",
            "2006-07-05",
        ),
        case("date of undefined is empty", "[{{ nosuch | date: '%Y' }}]", "{}", "[]"),
    ]);
}
