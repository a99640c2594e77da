use http_body_util::Full;
use hyper::{
    HeaderMap, StatusCode,
    body::Bytes,
    header::{self, HeaderName, HeaderValue},
};
use log::warn;
use maud::Markup;

pub type HyperResponse = hyper::Response<Full<Bytes>>;

#[derive(Debug)]
pub struct ServerResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ServerResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: HeaderName, value: impl AsRef<str>) -> Self {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => warn!("Dropping invalid value for header {name}"),
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn html(self, markup: Markup) -> Self {
        self.header(header::CONTENT_TYPE, "text/html;charset=UTF-8")
            .body(markup.into_string())
    }

    pub fn svg(self, markup: Markup) -> Self {
        self.header(header::CONTENT_TYPE, "image/svg+xml")
            .body(markup.into_string())
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn into_hyper(self) -> HyperResponse {
        let mut resp = hyper::Response::new(Full::new(self.body));
        *resp.status_mut() = self.status;
        *resp.headers_mut() = self.headers;
        resp
    }
}

impl Default for ServerResponse {
    fn default() -> Self {
        Self::new()
    }
}

pub fn not_found() -> ServerResponse {
    ServerResponse::new()
        .status(StatusCode::NOT_FOUND)
        .body("page not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_hyper_response() {
        let resp = ServerResponse::new()
            .status(StatusCode::BAD_GATEWAY)
            .header(header::ETAG, "\"1\"")
            .header(header::LOCATION, "bad\nvalue")
            .body("oops")
            .into_hyper();

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(resp.headers()[header::ETAG], "\"1\"");
        assert!(!resp.headers().contains_key(header::LOCATION));
    }

    #[test]
    fn html_sets_content_type() {
        let resp = ServerResponse::new().html(maud::html! { p { "hi" } });

        assert_eq!(resp.status_code(), StatusCode::OK);
        assert_eq!(
            resp.into_hyper().headers()[header::CONTENT_TYPE],
            "text/html;charset=UTF-8"
        );
    }
}
