use axum::{response::Html, routing::get, Router};
use std::sync::Arc;

use crate::jobs::JobRunner;
use crate::media::Extractor;

pub mod download;
pub mod error;
pub mod info;

const INDEX_HTML: &str = r#"<html>
  <body>
    <h2>Media Downloader</h2>
    <form action="/download" method="post">
      URL: <input name="url" type="text" style="width:400px"/><br/>
      Type:
      <select name="kind">
        <option value="video">Video (mp4)</option>
        <option value="audio">Audio (mp3)</option>
        <option value="thumbnail">Thumbnail (jpg)</option>
      </select><br/><br/>
      <button type="submit">Download</button>
    </form>
  </body>
</html>"#;

pub fn router(runner: Arc<JobRunner>, extractor: Arc<dyn Extractor>) -> Router {
    Router::new()
        .route("/", get(index))
        .merge(download::router(runner))
        .merge(info::router(extractor))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}
