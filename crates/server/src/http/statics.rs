use config::APP_VERSION;
use hyper::{StatusCode, header};

use super::{request::ServerRequest, response::ServerResponse};

/// Static files only change between releases, so the version doubles as the ETag.
fn etag() -> String {
    format!("\"{APP_VERSION}\"")
}

fn static_response(client_etag: Option<&str>, file: &'static str, mime: &str) -> ServerResponse {
    let etag = etag();

    if client_etag == Some(etag.as_str()) {
        ServerResponse::new().status(StatusCode::NOT_MODIFIED)
    } else {
        ServerResponse::new()
            .header(header::CONTENT_TYPE, mime)
            .header(header::ETAG, etag)
            .body(file)
    }
}

macro_rules! static_file {
    ($name:ident, $path:literal, $mime:literal) => {
        pub async fn $name(req: ServerRequest) -> Result<ServerResponse, ServerResponse> {
            let client_etag = req
                .headers()
                .get(header::IF_NONE_MATCH)
                .and_then(|x| x.to_str().ok());

            Ok(static_response(client_etag, include_str!($path), $mime))
        }
    };
}

static_file!(css, "../../static/main.css", "text/css;charset=UTF-8");
