use std::convert::Infallible;

use log::debug;

use crate::pages;

use super::response::{HyperResponse, not_found};
use super::{request::ServerRequest, statics};

const GET: &str = "GET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    MainCss,
    Dashboard,
    ChartSvg,
}

fn route(method: &str, path: &[&str]) -> Option<Route> {
    match (method, path) {
        (GET, ["static", "main.css"]) => Some(Route::MainCss),

        (GET, []) => Some(Route::Dashboard),
        (GET, ["chart.svg"]) => Some(Route::ChartSvg),

        _ => None,
    }
}

pub async fn router(req: ServerRequest) -> Result<HyperResponse, Infallible> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let path_segments: Vec<_> = path.split('/').filter(|x| !x.is_empty()).collect();

    let resp = match route(&method, &path_segments) {
        Some(Route::MainCss) => statics::css(req).await,
        Some(Route::Dashboard) => pages::dashboard::page(req).await,
        Some(Route::ChartSvg) => pages::dashboard::chart_svg(req).await,
        None => Ok(not_found()),
    };

    // Handlers return their error pages as Err
    let resp = resp.unwrap_or_else(|err| err);

    debug!("{method} {path} -> {}", resp.status_code());

    Ok(resp.into_hyper())
}
