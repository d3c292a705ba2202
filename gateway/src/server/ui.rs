//! The `?ui` API exerciser: a single self-contained page that loads the
//! generated OpenAPI document into an embedded viewer.

/// Render the exerciser page for a contract instance or ABI factory.
pub fn exerciser_html(
    base_url: &str,
    prefix: &str,
    id: &str,
    from_query: &str,
    factory: bool,
) -> String {
    let spec_url = format!("{base_url}/{prefix}s/{id}?swagger{from_query}");
    let download_url = format!("{base_url}/{prefix}s/{id}?swagger&download{from_query}");
    let factory_note = if factory {
        "<li><code>POST</code> against <code>/</code> (the constructor) deploys a new instance; \
         each deployed instance gets its own API scoped to its address</li>"
    } else {
        ""
    };
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <script src="https://unpkg.com/rapidoc/dist/rapidoc-min.js"></script>
</head>
<body>
  <rapi-doc
    spec-url="{spec_url}"
    allow-spec-url-load="false"
    allow-spec-file-load="false"
    heading-text="Ethereum REST Gateway"
  >
    <div slot="overview">
      <ul>
        <li><code>POST</code> actions against methods write to the chain unless marked read-only</li>
        {factory_note}
        <li><code>GET</code> actions never write to the chain</li>
      </ul>
      <p><a href="{download_url}">Download the OpenAPI definition</a></p>
    </div>
  </rapi-doc>
</body>
</html>
"#
    )
}
