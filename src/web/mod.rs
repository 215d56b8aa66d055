// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Read-only web dashboard over the screenshot store

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::{ScreenshotRecord, ScreenshotStore, StoreStats};
use crate::SnapsortError;

const DEFAULT_SEARCH_LIMIT: usize = 50;
const DEFAULT_RECENT_LIMIT: usize = 20;
const PREVIEW_CHARS: usize = 150;

/// Shared application state
pub struct AppState {
    pub store: ScreenshotStore,
    pub config: AppConfig,
}

/// Store failures as HTTP responses
pub struct ApiError {
    status: StatusCode,
    error: SnapsortError,
}

impl ApiError {
    /// Search failure: a generic SQLite error from the fixed FTS statement
    /// can only come from the caller's MATCH expression.
    fn from_search(error: SnapsortError) -> Self {
        match &error {
            SnapsortError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::Unknown =>
            {
                Self { status: StatusCode::BAD_REQUEST, error }
            }
            _ => error.into(),
        }
    }
}

impl From<SnapsortError> for ApiError {
    fn from(error: SnapsortError) -> Self {
        let status = match error {
            SnapsortError::StoreClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("API error ({}): {}", self.status, self.error);
        (self.status, self.error.to_string()).into_response()
    }
}

/// Create the web application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/api/stats", get(api_stats))
        .route("/api/search", get(api_search))
        .route("/api/recent", get(api_recent))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize, Default)]
struct SearchQuery {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
}

#[derive(Deserialize, Default)]
struct RecentQuery {
    limit: Option<usize>,
}

// === Page Handlers ===

async fn index_page(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Html<String> {
    let stats = state.store.get_stats().unwrap_or_default();
    let query_text = query.q.trim();
    let (heading, records) = if query_text.is_empty() {
        ("Recent Screenshots".to_string(), state.store.get_recent(DEFAULT_RECENT_LIMIT))
    } else {
        (
            format!("Results for \"{}\"", escape_html(query_text)),
            state.store.search(query_text, query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT)),
        )
    };
    let records = records.unwrap_or_else(|e| {
        warn!("Dashboard query failed: {}", e);
        Vec::new()
    });

    Html(render_index(&stats, &heading, query_text, &records))
}

// === API Handlers ===

async fn api_stats(State(state): State<Arc<AppState>>) -> Result<Json<StoreStats>, ApiError> {
    Ok(Json(state.store.get_stats()?))
}

async fn api_search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<ScreenshotRecord>>, ApiError> {
    let q = query.q.trim();
    if q.is_empty() {
        return Ok(Json(Vec::new()));
    }
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let records = state.store.search(q, limit).map_err(ApiError::from_search)?;
    Ok(Json(records))
}

async fn api_recent(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<ScreenshotRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    Ok(Json(state.store.get_recent(limit)?))
}

// === Template Rendering ===

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn format_size(bytes: i64) -> String {
    const KB: f64 = 1024.0;
    let bytes = bytes as f64;
    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < KB * KB {
        format!("{:.1} KB", bytes / KB)
    } else {
        format!("{:.1} MB", bytes / (KB * KB))
    }
}

fn base_template(title: &str, content: &str) -> String {
    format!(r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{} - Snapsort</title>
    <style>
        :root {{
            --bg-primary: #1a1a2e;
            --bg-secondary: #16213e;
            --bg-card: #0f3460;
            --text-primary: #e8e8e8;
            --text-secondary: #a0a0a0;
            --accent: #e94560;
            --border: #2a2a4a;
        }}
        * {{ box-sizing: border-box; margin: 0; padding: 0; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            line-height: 1.6;
        }}
        .container {{ max-width: 1200px; margin: 0 auto; padding: 20px; }}
        nav {{
            background: var(--bg-secondary);
            padding: 15px 20px;
            border-bottom: 1px solid var(--border);
        }}
        nav .logo {{
            font-size: 1.5em;
            font-weight: bold;
            color: var(--accent);
            text-decoration: none;
        }}
        .card {{
            background: var(--bg-card);
            border-radius: 12px;
            padding: 20px;
            margin-bottom: 20px;
        }}
        .card h2 {{ margin-bottom: 15px; color: var(--accent); }}
        .stats-grid {{
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
            gap: 20px;
            margin: 20px 0 30px;
        }}
        .stat-card {{
            background: var(--bg-card);
            border-radius: 12px;
            padding: 20px;
            text-align: center;
        }}
        .stat-card .number {{ font-size: 2.5em; font-weight: bold; color: var(--accent); }}
        .stat-card .label {{ color: var(--text-secondary); font-size: 0.9em; }}
        form input {{
            width: 100%;
            padding: 12px;
            font-size: 1em;
            border-radius: 8px;
            border: 1px solid var(--border);
            background: var(--bg-secondary);
            color: var(--text-primary);
            margin-bottom: 20px;
        }}
        table {{ width: 100%; border-collapse: collapse; }}
        th, td {{ padding: 12px; text-align: left; border-bottom: 1px solid var(--border); }}
        th {{ color: var(--text-secondary); font-weight: 500; }}
        .preview {{ color: var(--text-secondary); font-size: 0.85em; }}
        .category-badge {{
            display: inline-block;
            background: var(--bg-secondary);
            border: 1px solid var(--border);
            padding: 4px 10px;
            border-radius: 6px;
            font-size: 0.85em;
        }}
        .duplicate {{ color: var(--accent); font-size: 0.8em; }}
    </style>
</head>
<body>
    <nav><a href="/" class="logo">Snapsort</a></nav>
    <main class="container">
        {}
    </main>
</body>
</html>"#, title, content)
}

fn render_index(stats: &StoreStats, heading: &str, query: &str, records: &[ScreenshotRecord]) -> String {
    let stats_html = format!(r#"
        <div class="stats-grid">
            <div class="stat-card"><div class="number">{}</div><div class="label">Screenshots</div></div>
            <div class="stat-card"><div class="number">{}</div><div class="label">Total Size</div></div>
            <div class="stat-card"><div class="number">{}</div><div class="label">Duplicates</div></div>
        </div>
    "#, stats.total, format_size(stats.total_size), stats.duplicates);

    let categories_html: String = stats.by_category.iter()
        .map(|(cat, count)| format!("<tr><td>{}</td><td>{}</td></tr>", escape_html(cat), count))
        .collect();

    let content = format!(r#"
        <h1>Dashboard</h1>
        {}
        <form method="get" action="/">
            <input type="text" name="q" value="{}" placeholder="Search screenshot text, names and tags...">
        </form>
        <div style="display: grid; grid-template-columns: 2fr 1fr; gap: 20px;">
            <div class="card">
                <h2>{}</h2>
                {}
            </div>
            <div class="card">
                <h2>Categories</h2>
                <table>
                    <tr><th>Category</th><th>Count</th></tr>
                    {}
                </table>
            </div>
        </div>
    "#, stats_html, escape_html(query), heading, render_records_table(records), categories_html);

    base_template("Dashboard", &content)
}

fn render_records_table(records: &[ScreenshotRecord]) -> String {
    if records.is_empty() {
        return "<p>No screenshots found</p>".to_string();
    }

    let rows: String = records.iter()
        .map(|r| {
            let preview: String = r.ocr_text.chars().take(PREVIEW_CHARS).collect();
            let duplicate = match r.duplicate_of {
                Some(id) => format!(r#" <span class="duplicate">duplicate of #{}</span>"#, id),
                None if r.is_duplicate => r#" <span class="duplicate">duplicate</span>"#.to_string(),
                None => String::new(),
            };
            format!(r#"
                <tr>
                    <td>{}{}<div class="preview">{}</div></td>
                    <td><span class="category-badge">{}</span></td>
                    <td>{}</td>
                </tr>
            "#,
            escape_html(&r.new_name),
            duplicate,
            escape_html(&preview),
            r.category,
            r.processed_at.format("%Y-%m-%d %H:%M"),
            )
        })
        .collect();

    format!(r#"
        <table>
            <tr><th>Name</th><th>Category</th><th>Processed</th></tr>
            {}
        </table>
    "#, rows)
}

/// Start the web server with config and store
pub async fn start_server(config: AppConfig, store: ScreenshotStore) -> crate::Result<()> {
    let addr = format!("{}:{}", config.web.host, config.web.port);
    let state = Arc::new(AppState { store, config });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Dashboard available at http://{}", addr);

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
