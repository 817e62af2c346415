//! Minimal HTTP preview server.
//!
//! Puts the storage gateway behind a real socket so exported pages can be
//! opened in a browser exactly as they were uploaded:
//!
//! | Request | Answer |
//! |---------|--------|
//! | `GET <scope>` | Preview page (mode selector + iframe), `?view=<mode\|config>` |
//! | `GET <scope>files/js/style-designer.js` | Post-load hook script |
//! | `GET <scope>contents/…`, `<scope>theme/…` | The gateway's answer |
//! | anything else | `404` |
//!
//! Only `GET` and `HEAD` are served. One thread per connection, one request
//! per connection.
//!
//! Uses [maud](https://maud.lambda.xyz/) for the preview page.

use crate::client::StorageError;
use crate::context::AppContext;
use crate::rewrite::HOOK_SCRIPT_PATH;
use crate::theme_config::{ConfigRecord, FIELDS, ThemeConfigError};
use crate::types::Mode;
use crate::view::{ActiveView, Preview};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    ThemeConfig(#[from] ThemeConfigError),
}

/// Script every stored page loads after rendering. Pages may define
/// `window.sd` beforehand to hook in.
pub const HOOK_SCRIPT: &str = r#"(() => {
    const sd = window.sd || { init() {} };
    if (typeof sd.init === 'function') {
        sd.init();
    }
    window.sd = sd;
})();
"#;

const PAGE_CSS: &str = r#"
body { font-family: system-ui, sans-serif; margin: 0; display: flex; flex-direction: column; height: 100vh; }
header { display: flex; gap: .5rem; align-items: center; padding: .5rem 1rem; border-bottom: 1px solid #ddd; }
header a { padding: .25rem .75rem; border: 1px solid #ccc; border-radius: 4px; text-decoration: none; color: #333; }
header a.active { background: #333; color: #fff; }
main { flex: 1; display: flex; flex-direction: column; }
iframe { flex: 1; border: 0; width: 100%; }
.alert { margin: 1rem; padding: .75rem 1rem; border-radius: 4px; background: #eef4ff; }
.alert.warning { background: #fff4e0; }
table { margin: 1rem; border-collapse: collapse; }
th, td { text-align: left; padding: .25rem .75rem; vertical-align: top; }
td { white-space: pre-wrap; }
"#;

const MAX_REQUEST_HEAD: usize = 16 * 1024;

/// A response ready to be written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn new(status: u16, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    fn not_found() -> Self {
        Self::new(404, "text/plain; charset=utf-8", "Not found")
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            500 => "Internal Server Error",
            s if (200..300).contains(&s) => "OK",
            _ => "Unknown",
        }
    }

    /// Serialize with `Connection: close`. `HEAD` keeps the headers of the
    /// full response but drops the body.
    pub fn to_bytes(&self, head_only: bool) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Cache-Control: no-store\r\n",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len()
        );
        if self.status == 405 {
            out.push_str("Allow: GET, HEAD\r\n");
        }
        out.push_str("Connection: close\r\n\r\n");
        let mut bytes = out.into_bytes();
        if !head_only {
            bytes.extend_from_slice(&self.body);
        }
        bytes
    }
}

/// Answer one request. `target` is the request-target as sent by the
/// client (path plus optional query).
pub fn handle_request(ctx: &AppContext, method: &str, target: &str) -> HttpResponse {
    if !matches!(method, "GET" | "HEAD") {
        return HttpResponse::new(405, "text/plain; charset=utf-8", "Method not allowed");
    }

    let storage = ctx.storage();
    let scope = storage.scope();
    let Ok(url) = scope.resolve_href(target) else {
        return HttpResponse::new(400, "text/plain; charset=utf-8", "Bad request");
    };
    let Some(relative) = scope.relative_path(&url) else {
        return HttpResponse::not_found();
    };

    if relative.is_empty() || relative == "index.html" {
        let view = url
            .query_pairs()
            .find(|(k, _)| k == "view")
            .map(|(_, v)| v.into_owned());
        return match render_preview(ctx, view.as_deref()) {
            Ok(markup) => HttpResponse::new(200, "text/html; charset=utf-8", markup.into_string()),
            Err(err) => {
                tracing::error!(%err, "preview page failed");
                HttpResponse::new(500, "text/plain; charset=utf-8", err.to_string())
            }
        };
    }

    if relative == HOOK_SCRIPT_PATH {
        return HttpResponse::new(200, "application/javascript; charset=utf-8", HOOK_SCRIPT);
    }

    match storage.fetch(url.as_str()) {
        Ok(response) => HttpResponse {
            status: response.status,
            content_type: response
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            body: response.body,
        },
        Err(err) => {
            tracing::warn!(%err, %target, "gateway fetch failed");
            HttpResponse::not_found()
        }
    }
}

fn render_preview(ctx: &AppContext, view: Option<&str>) -> Result<Markup, ServeError> {
    let mut preview = Preview::from_context(ctx)?;
    let src = match view {
        Some("config") => {
            preview.activate_config();
            None
        }
        Some(id) => match Mode::from_id(id).and_then(|mode| preview.select(mode)) {
            Some(src) => Some(src),
            None => preview.start(),
        },
        None => preview.start(),
    };

    let config_view = matches!(preview.active(), Some(ActiveView::ConfigEditor));
    let (record, warning) = if config_view {
        ConfigRecord::load(ctx.storage())?
    } else {
        (ConfigRecord::default(), None)
    };

    Ok(preview_page(&preview, src.as_deref(), &record, warning.as_deref()))
}

fn preview_page(
    preview: &Preview,
    src: Option<&str>,
    record: &ConfigRecord,
    warning: Option<&str>,
) -> Markup {
    let active = preview.active();
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { "Style Designer" }
                style { (PreEscaped(PAGE_CSS)) }
            }
            body {
                header {
                    @for mode in preview.available() {
                        @let is_active = active == Some(ActiveView::Mode(mode));
                        a href={ "?view=" (mode.id()) } class=[is_active.then_some("active")] {
                            (mode.label())
                        }
                    }
                    a href="?view=config" class=[(active == Some(ActiveView::ConfigEditor)).then_some("active")] {
                        "Configuration"
                    }
                    @if let Some(src) = src {
                        a href=(src) target="_blank" rel="noopener noreferrer" { "Open in new window" }
                    }
                }
                main {
                    @if let Some(src) = src {
                        iframe src=(src) title="Preview" {}
                    } @else {
                        @if let Some(message) = preview.info_message() {
                            div.alert role="status" { (message) }
                        }
                        @if let Some(warning) = warning {
                            div.alert.warning role="status" { (warning) }
                        }
                        table {
                            @for field in FIELDS {
                                tr {
                                    th { (field) }
                                    td { (record.get(field).unwrap_or_default()) }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

fn read_request_head(stream: &mut TcpStream) -> io::Result<String> {
    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 4096];
    while head.len() < MAX_REQUEST_HEAD {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn serve_connection(mut stream: TcpStream, ctx: &AppContext) -> io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let head = read_request_head(&mut stream)?;
    let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(());
    };

    let response = handle_request(ctx, method, target);
    tracing::debug!(%method, %target, status = response.status, "request");
    stream.write_all(&response.to_bytes(method == "HEAD"))?;
    stream.flush()
}

/// A bound preview server. Call [`run`](Self::run) to start accepting.
pub struct PreviewServer {
    listener: TcpListener,
    ctx: Arc<AppContext>,
}

impl PreviewServer {
    /// Bind to `addr` and register the gateway.
    pub fn bind(ctx: Arc<AppContext>, addr: &str) -> Result<Self, ServeError> {
        ctx.init()?;
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails.
    pub fn run(self) -> Result<(), ServeError> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "preview server listening");
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                    continue;
                }
            };
            let ctx = Arc::clone(&self.ctx);
            thread::spawn(move || {
                if let Err(err) = serve_connection(stream, &ctx) {
                    tracing::debug!(%err, "connection error");
                }
            });
        }
        Ok(())
    }
}
