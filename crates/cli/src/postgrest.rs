//! PostgREST target store (Supabase and any other PostgREST deployment).
//!
//! - `GET  /rest/v1/<table>?select=…&order=<key>.asc&limit=…&offset=…` for a full fetch
//! - `GET  /rest/v1/<table>?select=…&<key>=in.(…)` for a keyed read-back
//! - `PATCH /rest/v1/<table>?<key>=eq.<k>` with `Prefer: return=representation`;
//!   the number of rows in the response is the affected count
//!
//! Full fetches page until the server reports the last row (`Content-Range`)
//! or returns an empty page; the server may cap pages below the requested
//! limit. Reads retry 429/5xx and network errors with exponential backoff.
//! Writes are sent exactly once.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::thread;
use std::time::Duration;

use rectify_recon::{
    FetchOutput, ReconError, Record, RecordLayout, RowWarning, Source, SourceConfig, TargetStore,
};

use crate::exit_codes;
use crate::CliError;

// ── Constants ───────────────────────────────────────────────────────

pub const DEFAULT_API_KEY_ENV: &str = "SUPABASE_KEY";
const USER_AGENT: &str = concat!("rectify/", env!("CARGO_PKG_VERSION"));
const MAX_RETRIES: u32 = 3;
const PAGE_LIMIT: usize = 1000;
/// Keys per `in.(…)` filter, to keep URLs short.
const KEY_CHUNK: usize = 100;

// ── Errors ──────────────────────────────────────────────────────────

/// One JSON array response. `total` comes from `Content-Range: a-b/<total>`.
struct Page {
    rows: Vec<serde_json::Value>,
    total: Option<usize>,
}

/// `0-499/1234` → 1234; `*/0` → 0; `0-499/*` → unknown.
fn content_range_total(value: &str) -> Option<usize> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

/// A request that did not produce a usable body.
#[derive(Debug)]
struct Failure {
    /// `None` for network errors.
    status: Option<u16>,
    message: String,
}

impl Failure {
    fn into_error(self, source: &str) -> ReconError {
        match self.status {
            Some(status) => ReconError::Rejected {
                source: source.to_string(),
                status,
                reason: self.message,
            },
            None => ReconError::unavailable(source, self.message),
        }
    }

    /// Store error text as reported on a failed correction.
    fn describe(&self) -> String {
        match self.status {
            Some(status) => format!("HTTP {status}: {}", self.message),
            None => self.message.clone(),
        }
    }
}

/// PostgREST error bodies look like `{"code","message","details","hint"}`.
fn extract_error(body: &str, status: u16) -> String {
    let parsed: serde_json::Value = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    let field = |name: &str| parsed.get(name).and_then(|v| v.as_str()).filter(|s| !s.is_empty());
    match (field("message"), field("details")) {
        (Some(msg), Some(details)) => format!("{msg} ({details})"),
        (Some(msg), None) => msg.to_string(),
        _ if !body.trim().is_empty() => body.trim().chars().take(200).collect(),
        _ => format!("HTTP {status}"),
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Column reference for `select=`; anything but a plain identifier is quoted.
fn select_column(name: &str) -> String {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\\\""))
    }
}

/// `in.("a","b")` with values quoted so commas and parentheses survive.
fn in_filter<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    let quoted: Vec<String> = values
        .into_iter()
        .map(|v| format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

/// JSON cell as text. Nulls read as blank.
fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve the API key: flag > env > error.
pub fn resolve_api_key(flag: Option<String>, env_var: &str) -> Result<String, CliError> {
    let missing = || CliError {
        code: exit_codes::EXIT_REMOTE_NOT_AUTH,
        message: format!("missing PostgREST API key (use --api-key or set {env_var})"),
        hint: None,
    };

    if let Some(key) = flag {
        let trimmed = key.trim().to_string();
        if trimmed.is_empty() {
            return Err(missing());
        }
        return Ok(trimmed);
    }

    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(missing()),
    }
}

// ── Store ───────────────────────────────────────────────────────────

pub struct PostgrestStore {
    name: String,
    http: reqwest::blocking::Client,
    base_url: String,
    table: String,
    api_key: String,
    layout: RecordLayout,
    max_retries: u32,
    page_size: usize,
    /// Normalized key → raw key values seen in the table, so writes target
    /// the row as stored.
    raw_keys: RefCell<HashMap<String, BTreeSet<String>>>,
    /// Set once every key in the table has been seen.
    keys_indexed: Cell<bool>,
}

impl PostgrestStore {
    pub fn new(
        name: &str,
        base_url: &str,
        table: &str,
        api_key: String,
        layout: RecordLayout,
    ) -> Result<Self, ReconError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ReconError::unavailable(name, format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            table: table.to_string(),
            api_key,
            layout,
            max_retries: MAX_RETRIES,
            page_size: PAGE_LIMIT,
            raw_keys: RefCell::new(HashMap::new()),
            keys_indexed: Cell::new(false),
        })
    }

    pub fn from_config(
        name: &str,
        config: &SourceConfig,
        fields: &[String],
        api_key: String,
    ) -> Result<Self, ReconError> {
        let url = config.url.as_deref().ok_or_else(|| {
            ReconError::ConfigValidation(format!("{name}: postgrest source requires 'url'"))
        })?;
        let table = config.table.as_deref().ok_or_else(|| {
            ReconError::ConfigValidation(format!("{name}: postgrest source requires 'table'"))
        })?;
        Self::new(name, url, table, api_key, RecordLayout::from_config(config, fields))
    }

    #[cfg(test)]
    fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[cfg(test)]
    fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    fn endpoint(&self) -> Result<url::Url, ReconError> {
        let raw = format!("{}/rest/v1/{}", self.base_url, self.table);
        url::Url::parse(&raw).map_err(|e| {
            ReconError::ConfigValidation(format!("{}: invalid url '{raw}': {e}", self.name))
        })
    }

    fn authorized(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        req.header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
    }

    /// Send once and return the JSON array body.
    fn send_once(&self, req: reqwest::blocking::RequestBuilder) -> Result<Page, Failure> {
        let resp = self.authorized(req).send().map_err(|e| Failure {
            status: None,
            message: format!("request failed: {e}"),
        })?;

        let status = resp.status().as_u16();
        let total = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total);
        let text = resp.text().map_err(|e| Failure {
            status: Some(status),
            message: format!("failed to read response body: {e}"),
        })?;

        if !(200..300).contains(&status) {
            return Err(Failure {
                status: Some(status),
                message: extract_error(&text, status),
            });
        }

        let trimmed = text.trim_start_matches('\u{feff}').trim();
        if trimmed.is_empty() {
            return Ok(Page { rows: Vec::new(), total });
        }
        match serde_json::from_str(trimmed) {
            Ok(serde_json::Value::Array(rows)) => Ok(Page { rows, total }),
            Ok(_) => Err(Failure {
                status: Some(status),
                message: "expected a JSON array".to_string(),
            }),
            Err(e) => Err(Failure {
                status: Some(status),
                message: format!(
                    "failed to parse JSON response: {e} (body: {})",
                    trimmed.chars().take(200).collect::<String>()
                ),
            }),
        }
    }

    /// GET with retry + exponential backoff on 429, 5xx and network errors.
    fn get_with_retry(&self, url: &url::Url, count: bool) -> Result<Page, Failure> {
        let mut backoff_secs = 1u64;
        let mut attempt = 0;
        loop {
            let mut req = self.http.get(url.clone());
            if count {
                req = req.header("Prefer", "count=exact");
            }
            match self.send_once(req) {
                Ok(page) => return Ok(page),
                Err(f) => {
                    let retryable = match f.status {
                        None => true,
                        Some(s) => s == 429 || s >= 500,
                    };
                    if !retryable || attempt >= self.max_retries {
                        return Err(f);
                    }
                    attempt += 1;
                    log::warn!(
                        "{}: retry {}/{} in {}s ({})",
                        self.name,
                        attempt,
                        self.max_retries,
                        backoff_secs,
                        f.describe()
                    );
                    thread::sleep(Duration::from_secs(backoff_secs));
                    backoff_secs *= 2;
                }
            }
        }
    }

    /// Turn response rows into records, remembering raw keys.
    fn to_records(
        &self,
        layout: &RecordLayout,
        rows: Vec<serde_json::Value>,
        first_row: usize,
        out: &mut FetchOutput,
    ) {
        let mut raw_keys = self.raw_keys.borrow_mut();
        for (i, row) in rows.into_iter().enumerate() {
            let row_no = (first_row + i + 1) as u64;
            let serde_json::Value::Object(obj) = row else {
                out.warnings.push(self.skip(row_no, "row is not a JSON object".to_string()));
                continue;
            };
            let cells: HashMap<&str, String> = obj.iter().map(|(k, v)| (k.as_str(), cell_text(v))).collect();

            match layout.build_record(|col| cells.get(col).map(String::as_str)) {
                Ok(record) => {
                    if let Some(raw) = cells.get(layout.columns.key.as_str()) {
                        raw_keys
                            .entry(record.key.clone())
                            .or_default()
                            .insert(raw.trim().to_string());
                    }
                    out.records.push(record);
                }
                Err(reason) => out.warnings.push(self.skip(row_no, reason)),
            }
        }
    }

    fn skip(&self, row: u64, reason: String) -> RowWarning {
        log::warn!("{}: skipping row {row}: {reason}", self.name);
        RowWarning {
            source: self.name.clone(),
            line: row,
            reason,
        }
    }

    /// Walk the whole table in key order, one page at a time.
    fn for_each_page(
        &self,
        select: &str,
        mut each: impl FnMut(Vec<serde_json::Value>, usize),
    ) -> Result<(), ReconError> {
        let order = format!("{}.asc", select_column(&self.layout.columns.key));
        let mut offset = 0usize;
        loop {
            let mut url = self.endpoint()?;
            url.query_pairs_mut()
                .append_pair("select", select)
                .append_pair("order", &order)
                .append_pair("limit", &self.page_size.to_string())
                .append_pair("offset", &offset.to_string());

            let page = self.get_with_retry(&url, true).map_err(|f| f.into_error(&self.name))?;
            let n = page.rows.len();
            log::debug!("{}: fetched {n} row(s) at offset {offset}", self.name);
            each(page.rows, offset);

            offset += n;
            if n == 0 || page.total.is_some_and(|total| offset >= total) {
                return Ok(());
            }
        }
    }

    /// Learn the stored form of every key, so keyed requests match rows whose
    /// key differs from its normalized form. A full fetch does this as well.
    fn index_keys(&self) -> Result<(), ReconError> {
        if self.keys_indexed.get() {
            return Ok(());
        }
        let key_col = self.layout.columns.key.clone();
        self.for_each_page(&select_column(&key_col), |rows, _| {
            let mut raw_keys = self.raw_keys.borrow_mut();
            for row in rows {
                let Some(raw) = row.get(key_col.as_str()).map(cell_text) else {
                    continue;
                };
                if let Some(key) = self.layout.key.normalize(&raw) {
                    raw_keys.entry(key).or_default().insert(raw.trim().to_string());
                }
            }
        })?;
        self.keys_indexed.set(true);
        Ok(())
    }

    /// Raw key values to filter on for a normalized key.
    fn raw_keys_for(&self, key: &str) -> Vec<String> {
        self.raw_keys
            .borrow()
            .get(key)
            .map(|raw| raw.iter().cloned().collect())
            .unwrap_or_else(|| vec![key.to_string()])
    }
}

impl Source for PostgrestStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<FetchOutput, ReconError> {
        let select = self
            .layout
            .required_columns()
            .iter()
            .map(|c| select_column(c))
            .collect::<Vec<_>>()
            .join(",");

        let mut out = FetchOutput::default();
        self.for_each_page(&select, |rows, offset| {
            self.to_records(&self.layout, rows, offset, &mut out)
        })?;
        self.keys_indexed.set(true);
        Ok(out)
    }
}

impl TargetStore for PostgrestStore {
    fn select(&self, keys: &[String], fields: &[String]) -> Result<FetchOutput, ReconError> {
        let layout = RecordLayout::new(
            self.layout.columns.clone(),
            self.layout.key.clone(),
            fields.to_vec(),
        );
        let select = layout
            .required_columns()
            .iter()
            .map(|c| select_column(c))
            .collect::<Vec<_>>()
            .join(",");
        let key_col = self.layout.columns.key.clone();

        self.index_keys()?;
        let raw: Vec<String> = keys.iter().flat_map(|k| self.raw_keys_for(k)).collect();
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();

        let mut out = FetchOutput::default();
        for chunk in raw.chunks(KEY_CHUNK) {
            let mut url = self.endpoint()?;
            url.query_pairs_mut()
                .append_pair("select", &select)
                .append_pair(&key_col, &in_filter(chunk.iter().map(String::as_str)));
            let page = self.get_with_retry(&url, false).map_err(|f| f.into_error(&self.name))?;
            self.to_records(&layout, page.rows, out.records.len() + out.warnings.len(), &mut out);
        }

        out.records.retain(|r: &Record| wanted.contains(r.key.as_str()));
        Ok(out)
    }

    fn apply_field(&mut self, key: &str, field: &str, value: &str) -> Result<usize, String> {
        let column = self
            .layout
            .column_for(field)
            .ok_or_else(|| format!("field '{field}' has no column mapping"))?
            .to_string();
        let key_col = &self.layout.columns.key;

        self.index_keys().map_err(|e| e.to_string())?;
        let raw = self.raw_keys_for(key);
        let filter = match raw.as_slice() {
            [single] => format!("eq.{single}"),
            many => in_filter(many.iter().map(String::as_str)),
        };

        let mut url = self.endpoint().map_err(|e| e.to_string())?;
        url.query_pairs_mut()
            .append_pair(key_col, &filter)
            .append_pair("select", &select_column(key_col));

        let mut body = serde_json::Map::new();
        body.insert(column, serde_json::Value::String(value.to_string()));

        let req = self
            .http
            .patch(url)
            .header("Prefer", "return=representation")
            .json(&serde_json::Value::Object(body));

        let page = self.send_once(req).map_err(|f| f.describe())?;
        log::debug!("{}: PATCH {key}.{field} touched {} row(s)", self.name, page.rows.len());
        Ok(page.rows.len())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
