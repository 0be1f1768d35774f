mod common;

use twigleaf::{Context, Options};

fn render(templates: &[(&str, &str)], name: &str, context: Context) -> String {
    common::env_with(templates).render_named(name, context).unwrap()
}

// ── extends / block / parent ──

#[test]
fn child_block_wraps_parent_content() {
    let out = render(
        &[
            ("base.twig", "<{% block x %}B{% endblock %}>"),
            (
                "child.twig",
                "{% extends 'base.twig' %}{% block x %}C-{{ parent() }}{% endblock %}",
            ),
        ],
        "child.twig",
        Context::new(),
    );
    assert_eq!(out, "<C-B>");
}

#[test]
fn parent_walks_a_three_level_chain() {
    let out = render(
        &[
            ("grand.twig", "{% block a %}G{% endblock %}"),
            (
                "mid.twig",
                "{% extends 'grand.twig' %}{% block a %}M{{ parent() }}{% endblock %}",
            ),
            (
                "leaf.twig",
                "{% extends 'mid.twig' %}{% block a %}L{{ parent() }}{% endblock %}",
            ),
        ],
        "leaf.twig",
        Context::new(),
    );
    assert_eq!(out, "LMG");
}

#[test]
fn child_output_outside_blocks_is_dropped() {
    let out = render(
        &[
            ("base.twig", "[{% block x %}base{% endblock %}|{% block y %}keep{% endblock %}]"),
            (
                "child.twig",
                "ignored{% extends 'base.twig' %}{% block x %}{{ who }}{% endblock %}",
            ),
        ],
        "child.twig",
        Context::new().with("who", "child"),
    );
    assert_eq!(out, "[child|keep]");
}

#[test]
fn extends_takes_the_first_existing_candidate() {
    let out = render(
        &[
            ("base.twig", "({% block x %}{% endblock %})"),
            (
                "child.twig",
                "{% extends ['missing.twig', 'base.twig'] %}{% block x %}ok{% endblock %}",
            ),
        ],
        "child.twig",
        Context::new(),
    );
    assert_eq!(out, "(ok)");
}

#[test]
fn blocks_render_in_place_without_extends() {
    let out = render(
        &[("page.twig", "a{% block x %}b{% endblock %}c{{ block('x') }}")],
        "page.twig",
        Context::new(),
    );
    assert_eq!(out, "abcb");
}

#[test]
fn use_imports_blocks_under_new_names() {
    let out = render(
        &[
            ("blocks.twig", "{% block title %}T{% endblock %}"),
            (
                "page.twig",
                "{% use 'blocks.twig' with title as heading %}[{{ block('heading') }}]",
            ),
        ],
        "page.twig",
        Context::new(),
    );
    assert_eq!(out, "[T]");
}

#[test]
fn use_applies_to_the_whole_template() {
    let blocks = ("blocks.twig", "{% block b %}FROM-USE{% endblock %}");
    let out = render(
        &[
            blocks,
            ("page.twig", "[{{ block('b') }}]{% use 'blocks.twig' %}[{{ block('b') }}]"),
        ],
        "page.twig",
        Context::new(),
    );
    assert_eq!(out, "[FROM-USE][FROM-USE]");

    let out = render(
        &[
            blocks,
            ("page.twig", "{% if false %}{% use 'blocks.twig' %}{% endif %}[{{ block('b') }}]"),
        ],
        "page.twig",
        Context::new(),
    );
    assert_eq!(out, "[FROM-USE]");
}

#[test]
fn used_templates_bring_their_own_uses() {
    let out = render(
        &[
            ("inner.twig", "{% block deep %}D{% endblock %}"),
            ("middle.twig", "{% use 'inner.twig' %}{% block top %}T{% endblock %}"),
            ("page.twig", "{% use 'middle.twig' %}{{ block('top') }}{{ block('deep') }}"),
        ],
        "page.twig",
        Context::new(),
    );
    assert_eq!(out, "TD");
}

#[test]
fn embed_overrides_blocks_of_the_embedded_template() {
    let out = render(
        &[
            ("card.twig", "<div>{% block body %}empty{% endblock %}</div>"),
            (
                "page.twig",
                "{% embed 'card.twig' %}{% block body %}{{ msg }}{% endblock %}{% endembed %}!",
            ),
        ],
        "page.twig",
        Context::new().with("msg", "hi"),
    );
    assert_eq!(out, "<div>hi</div>!");
}

// ── include ──

const PART: (&str, &str) = ("part.twig", "{{ a }}-{{ b ?? 'none' }}");

#[test]
fn include_with_only_and_ignore_missing() {
    let out = render(
        &[
            PART,
            (
                "page.twig",
                "{% include 'part.twig' %}|{% include 'part.twig' with {b: 2} %}|{% include 'part.twig' with {b: 2} only %}|{% include 'nope.twig' ignore missing %}",
            ),
        ],
        "page.twig",
        Context::new().with("a", 1),
    );
    assert_eq!(out, "1-none|1-2|-2|");
}

#[test]
fn include_function_renders_with_variables() {
    let out = render(
        &[
            PART,
            (
                "page.twig",
                "{{ include('part.twig', {b: 3}) }}/{{ include('part.twig', {b: 4}, false) }}/{{ include('nope.twig', {}, true, true) }}",
            ),
        ],
        "page.twig",
        Context::new().with("a", 1),
    );
    assert_eq!(out, "1-3/-4/");
}

#[test]
fn missing_include_is_an_error() {
    let env = common::env_with(&[("page.twig", "{% include 'nope.twig' %}")]);
    let err = env.render_named("page.twig", Context::new()).unwrap_err();
    assert!(err.is_not_found());
}

// ── macros ──

const FORMS: (&str, &str) = (
    "forms.twig",
    r#"{% macro input(name, type = 'text') %}<input name="{{ name }}" type="{{ type }}">{% endmacro %}"#,
);

#[test]
fn imported_macros_are_called_through_the_alias() {
    let out = render(
        &[FORMS, ("page.twig", "{% import 'forms.twig' as f %}{{ f.input('q') }}")],
        "page.twig",
        Context::new(),
    );
    assert_eq!(out, r#"<input name="q" type="text">"#);
}

#[test]
fn from_import_binds_single_macros() {
    let out = render(
        &[
            FORMS,
            (
                "page.twig",
                "{% from 'forms.twig' import input as field %}{{ field('p', 'password') }}",
            ),
        ],
        "page.twig",
        Context::new(),
    );
    assert_eq!(out, r#"<input name="p" type="password">"#);
}

#[test]
fn importing_an_unknown_macro_fails() {
    let env = common::env_with(&[
        FORMS,
        ("page.twig", "{% from 'forms.twig' import select %}"),
    ]);
    let err = env.render_named("page.twig", Context::new()).unwrap_err();
    assert!(err.to_string().contains("select"));
}

#[test]
fn macro_output_is_not_escaped_again() {
    let env = common::env_with_options(
        &[FORMS, ("page.twig", "{% import 'forms.twig' as f %}{{ f.input(v) }}")],
        Options::default().autoescape(true).rethrow(true),
    );
    let out = env
        .render_named("page.twig", Context::new().with("v", "<x>"))
        .unwrap();
    assert_eq!(out, r#"<input name="&lt;x&gt;" type="text">"#);
}

// ── locating templates ──

#[test]
fn namespaces_expand_in_references() {
    let env = common::env_with_options(
        &[
            ("views/layouts/base.twig", "[{% block c %}{% endblock %}]"),
            ("at.twig", "{% extends '@layouts/base.twig' %}{% block c %}at{% endblock %}"),
            ("colon.twig", "{% extends 'layouts::base.twig' %}{% block c %}colon{% endblock %}"),
        ],
        Options::default()
            .rethrow(true)
            .namespace("layouts", "views/layouts"),
    );
    assert_eq!(env.render_named("at.twig", Context::new()).unwrap(), "[at]");
    assert_eq!(env.render_named("colon.twig", Context::new()).unwrap(), "[colon]");
}

#[test]
fn relative_references_follow_the_including_template() {
    let out = render(
        &[
            (
                "views/pages/home.twig",
                "{% include './part.twig' %}+{% include '../shared.twig' %}",
            ),
            ("views/pages/part.twig", "P"),
            ("views/shared.twig", "S"),
        ],
        "views/pages/home.twig",
        Context::new(),
    );
    assert_eq!(out, "P+S");
}

#[test]
fn inline_includes_resolve_compiled_names() {
    let env = common::env_with_options(
        &[],
        Options::default().rethrow(true).allow_inline_includes(true),
    );
    env.compile_named("greeting", "hello {{ who }}").unwrap();
    let out = env
        .render_str("{% include 'greeting' %}!", Context::new().with("who", "Ann"))
        .unwrap();
    assert_eq!(out, "hello Ann!");
}
