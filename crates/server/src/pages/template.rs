use config::{APP_VERSION, Config};
use maud::{DOCTYPE, Markup, html};

use crate::http::response::ServerResponse;

pub fn template(config: &Config, content: Markup) -> ServerResponse {
    let page = html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1";

                title { (config.title) }

                link rel="stylesheet" href="/static/main.css";
            }
            body {
                header {
                    h1 { (config.title) }
                }

                main {
                    (content)
                }

                footer {
                    "Nightscout dashboard v" (APP_VERSION) " · times in " (config.timezone.name())
                }
            }
        }
    };

    ServerResponse::new().html(page)
}
