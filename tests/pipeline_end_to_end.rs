use foglio::application::render::{RenderRequest, payload, render_service};

async fn render(document: &str, markdown: &str) -> String {
    render_service()
        .render(&RenderRequest::new(document, markdown))
        .await
        .expect("rendering should succeed")
}

fn tags<'a>(html: &'a str, element: &str) -> Vec<&'a str> {
    let needle = format!("<{element} ");
    html.match_indices(&needle)
        .map(|(start, _)| {
            let end = html[start..]
                .find("></")
                .expect("element should be closed")
                + start;
            &html[start..end]
        })
        .collect()
}

fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {name}=\"");
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')? + start;
    Some(&tag[start..end])
}

fn decoded_json<T: serde::de::DeserializeOwned>(tag: &str, name: &str) -> T {
    let encoded = attr(tag, name).expect("attribute should be present");
    let json = payload::decode(encoded).expect("payload should decode");
    serde_json::from_str(&json).expect("payload should be JSON")
}

#[tokio::test]
async fn js_run_fence_renders_evaluated_element() {
    let html = render("js-run-fixture", include_str!("fixtures/js_run.md")).await;

    assert!(html.contains("<p>Text</p>"), "html: {html}");
    assert!(html.contains("<p>More</p>"), "html: {html}");

    let tags = tags(&html, "js-run");
    assert_eq!(tags.len(), 1, "html: {html}");
    let tag = tags[0];

    assert_eq!(
        payload::decode(attr(tag, "src").expect("src should be present"))
            .expect("src should decode"),
        "const x = 2 + 2; x",
    );
    assert_eq!(
        decoded_json::<serde_json::Value>(tag, "value"),
        serde_json::json!(4),
    );
    assert_eq!(decoded_json::<Vec<String>>(tag, "logs"), Vec::<String>::new());
    assert!(attr(tag, "error").is_none(), "tag: {tag}");
    assert_eq!(attr(tag, "badge"), Some("js (built)"));
}

#[tokio::test]
async fn html_demo_fence_renders_custom_element() {
    let html = render("html-demo-fixture", include_str!("fixtures/html_demo.md")).await;

    let tags = tags(&html, "html-demo");
    assert_eq!(tags.len(), 1, "html: {html}");
    let tag = tags[0];

    assert_eq!(
        payload::decode(attr(tag, "src").expect("src should be present"))
            .expect("src should decode"),
        "<b>hi</b>",
    );
    assert_eq!(attr(tag, "badge"), Some("html"));

    let markup = payload::decode(attr(tag, "code").expect("code should be present"))
        .expect("code should decode");
    assert!(markup.contains("hi"), "markup: {markup}");
}

#[tokio::test]
async fn math_document_renders_katex() {
    let html = render("math-fixture", include_str!("fixtures/math.md")).await;

    assert!(html.contains("katex"), "html: {html}");
    assert!(html.contains("katex-display"), "html: {html}");
    assert!(
        html.contains(r"$\frac{a}{$"),
        "unbalanced span should stay literal; html: {html}"
    );
    assert!(
        html.contains("$$x=1$$"),
        "single-line double-dollar run should stay literal; html: {html}"
    );
}

#[tokio::test]
async fn snippets_evaluate_in_document_order() {
    let html = render("run-order-fixture", include_str!("fixtures/run_order.md")).await;

    let tags = tags(&html, "js-run");
    assert_eq!(tags.len(), 2, "html: {html}");
    assert_eq!(
        decoded_json::<Vec<String>>(tags[0], "logs"),
        vec!["first".to_string()],
    );
    assert_eq!(
        decoded_json::<Vec<String>>(tags[1], "logs"),
        vec!["second".to_string()],
    );
}

#[tokio::test]
async fn non_run_fences_render_as_lined_code() {
    let html = render("code-fixture", include_str!("fixtures/code.md")).await;

    assert!(
        html.contains("<pre class=\"code-with-lines\">"),
        "html: {html}"
    );
    assert!(html.contains("language-python"), "html: {html}");
    assert!(html.contains("<span class=\"line\">"), "html: {html}");
    assert!(!html.contains("<js-run"), "html: {html}");
}

#[tokio::test]
async fn failing_snippet_degrades_in_band() {
    let html = render("failing-fixture", include_str!("fixtures/failing.md")).await;

    assert!(html.contains("<p>Before</p>"), "html: {html}");
    assert!(html.contains("<p>After</p>"), "html: {html}");

    let tags = tags(&html, "js-run");
    assert_eq!(tags.len(), 1, "html: {html}");
    let tag = tags[0];

    let error = decoded_json::<String>(tag, "error");
    assert!(error.contains("not defined"), "error: {error}");
    assert!(attr(tag, "value").is_none(), "tag: {tag}");
    assert_eq!(decoded_json::<Vec<String>>(tag, "logs"), Vec::<String>::new());
}
