mod common;

use twigleaf::{Context, Deferred, Environment, ErrorKind, Options, Value};

fn render(source: &str, context: Context) -> String {
    common::env_with(&[])
        .render_str(source, context)
        .unwrap()
}

// ── Text and whitespace ──

#[test]
fn raw_text_passes_through() {
    let source = "Plain text with } and { and %} alone.\n";
    assert_eq!(render(source, Context::new()), source);
}

#[test]
fn rendering_is_deterministic() {
    let env = common::env_with(&[]);
    let template = env
        .compile("{% for k, v in m %}{{ k }}{{ v }}{% endfor %}")
        .unwrap();
    let context = Context::from_serialize(&serde_json::json!({"m": {"z": 1, "a": 2, "m": 3}})).unwrap();
    let first = env.render(&template, context.clone()).unwrap();
    let second = env.render(&template, context).unwrap();
    assert_eq!(first, "z1a2m3");
    assert_eq!(first, second);
}

#[test]
fn dash_markers_trim_both_sides() {
    assert_eq!(render("a \n {{- \"x\" -}} \n b", Context::new()), "axb");
    assert_eq!(render("[ {%- if true -%} y {%- endif -%} ]", Context::new()), "[y]");
}

#[test]
fn newline_after_logic_tag_is_consumed() {
    assert_eq!(
        render("{% if true %}\nline\n{% endif %}\nend", Context::new()),
        "line\nend"
    );
}

#[test]
fn comments_and_verbatim() {
    assert_eq!(
        render("a{# {{ hidden }} #}b{% verbatim %}{{ kept }}{% endverbatim %}", Context::new()),
        "ab{{ kept }}"
    );
}

#[test]
fn trailing_backslash_in_string_literal() {
    assert_eq!(render(r"{{ 'a\\' }}|{{ 'it\'s' }}", Context::new()), r"a\|it's");
}

// ── Expressions ──

#[test]
fn operator_precedence() {
    assert_eq!(render("{{ 2 + 3 * 4 }}", Context::new()), "14");
    assert_eq!(render("{{ (2 + 3) * 4 }}", Context::new()), "20");
}

#[test]
fn floor_division_rounds_down() {
    assert_eq!(render("{{ -20 // 7 }}", Context::new()), "-3");
    assert_eq!(render("{{ 20 // 7 }}", Context::new()), "2");
    assert_eq!(render("{{ 7 / 2 }}", Context::new()), "3.5");
}

#[test]
fn strings_ranges_and_membership() {
    let context = Context::new().with("name", "twig");
    assert_eq!(
        render(
            "{{ 'Hi ' ~ name }}|{{ 1..3 }}|{{ 'w' in name }}|{{ name starts with 'tw' }}|{{ name matches '/^T/i' }}",
            context
        ),
        "Hi twig|1,2,3|true|true|true"
    );
}

#[test]
fn set_and_context_access() {
    assert_eq!(
        render(
            "{% set greeting = 'Hello' %}{% set who = {name: 'Ann'} %}{{ greeting }} {{ who.name }} {{ _context.greeting }}",
            Context::new()
        ),
        "Hello Ann Hello"
    );
}

#[test]
fn user_filters_functions_and_tests() {
    let env = common::env_with(&[]);
    env.add_filter("upper", |value: Value, _args: Vec<Value>| {
        Deferred::resolve(Value::from(value.to_string().to_uppercase()))
    });
    env.add_filter("join", |value: Value, args: Vec<Value>| {
        let glue = args.first().map(Value::to_string).unwrap_or_default();
        let items = value
            .entries()
            .unwrap_or_default()
            .into_iter()
            .map(|(_, item)| item.to_string())
            .collect::<Vec<_>>();
        Deferred::resolve(Value::from(items.join(&glue)))
    });
    env.add_function("sum", |args: Vec<Value>| {
        Deferred::resolve(Value::from(args.iter().map(Value::to_number).sum::<f64>()))
    });
    env.add_test("short", |value: &Value, _args: Vec<Value>| {
        Deferred::resolve(value.len().is_some_and(|len| len < 4))
    });

    let out = env
        .render_str(
            "{{ name|upper }} {{ [1, 2, 3]|join('-') }} {{ sum(1, 2, 3) }} {{ name is short ? 'short' : 'long' }}",
            Context::new().with("name", "ann"),
        )
        .unwrap();
    assert_eq!(out, "ANN 1-2-3 6 short");
}

#[test]
fn context_callables_get_their_receiver() {
    let mut user = indexmap::IndexMap::new();
    user.insert("first".to_string(), Value::from("Ann"));
    user.insert(
        "greet".to_string(),
        Value::function(|receiver: Option<&Value>, args: Vec<Value>| {
            let first = receiver.and_then(|r| r.get_key("first")).unwrap_or_default();
            let greeting = args.first().map(Value::to_string).unwrap_or_default();
            Deferred::resolve(Value::from(format!("{}, {}", greeting, first)))
        }),
    );
    let context = Context::new().with("user", Value::object(user));
    assert_eq!(render("{{ user.greet('Hello') }}", context), "Hello, Ann");
}

// ── Loops ──

#[test]
fn loop_index_and_ends() {
    let context = Context::new().with("items", vec![1, 2, 3, 4]);
    assert_eq!(
        render("{% for i in items %}{{ loop.index }}{% endfor %}", context.clone()),
        "1234"
    );
    assert_eq!(
        render(
            "{% for i in items %}{{ loop.first ? 'F' }}{{ loop.last ? 'L' }}.{% endfor %}",
            context.clone()
        ),
        "F...L."
    );
    assert_eq!(
        render(
            "{% for i in items %}{{ loop.revindex0 }}/{{ loop.length }} {% endfor %}",
            context
        ),
        "3/4 2/4 1/4 0/4 "
    );
}

#[test]
fn nested_loops_reach_the_parent_loop() {
    let context = Context::new().with("rows", vec![vec![1, 2], vec![3]]);
    assert_eq!(
        render(
            "{% for row in rows %}{% for cell in row %}{{ loop.parent.loop.index }}{{ cell }} {% endfor %}{% endfor %}",
            context
        ),
        "11 12 23 "
    );
}

// ── Strict variables and error handling ──

#[test]
fn strict_mode_names_the_missing_variable() {
    let env = common::env_with_options(
        &[],
        Options::default().strict_variables(true).rethrow(true),
    );
    let err = env.render_str("{{ x }}", Context::new()).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::UndefinedVariable(name) if name == "x"));
    assert_eq!(err.to_string(), "Variable \"x\" does not exist.");

    assert_eq!(
        env.render_str("{{ x is defined ? 'yes' : 'no' }}", Context::new())
            .unwrap(),
        "no"
    );
}

#[test]
fn errors_are_tagged_with_the_innermost_template() {
    let env = common::env_with_options(
        &[
            ("page.twig", "page:{% include 'part.twig' %}"),
            ("part.twig", "{{ missing }}"),
        ],
        Options::default().strict_variables(true).rethrow(true),
    );
    let err = env.render_named("page.twig", Context::new()).unwrap_err();
    assert_eq!(err.template(), Some("part.twig"));
}

#[test]
fn without_rethrow_output_degrades_to_partial() {
    common::setup();
    let env = Environment::builder()
        .options(Options::default().strict_variables(true))
        .build();
    assert_eq!(env.render_str("a{{ x }}b", Context::new()).unwrap(), "a");
}

// ── Escaping ──

#[test]
fn autoescape_never_double_escapes() {
    let env = common::env_with_options(
        &[],
        Options::default().autoescape(true).rethrow(true),
    );
    let context = Context::new()
        .with("s", "<b>")
        .with("safe", Value::safe("<i>ok</i>"));
    let out = env
        .render_str(
            "{{ s }}|{{ s|escape }}|{{ s|e|e }}|{{ safe }}|{{ s|raw }}",
            context,
        )
        .unwrap();
    assert_eq!(out, "&lt;b&gt;|&lt;b&gt;|&lt;b&gt;|<i>ok</i>|<b>");
}

#[test]
fn autoescape_tag_and_apply() {
    let env = common::env_with(&[]);
    env.add_filter("upper", |value: Value, _args: Vec<Value>| {
        Deferred::resolve(Value::from(value.to_string().to_uppercase()))
    });
    let out = env
        .render_str(
            "{% autoescape 'js' %}{{ q }}{% endautoescape %} {% apply upper %}hi {{ name }}{% endapply %}",
            Context::new().with("q", "a'b").with("name", "ann"),
        )
        .unwrap();
    assert_eq!(out, "a\\x27b HI ANN");
}
