use std::{io, path::Path, sync::OnceLock};

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct DirectoryListing {
    /// `/`-joined path below the storage root; empty for the root.
    pub relative: String,
    pub entries: Vec<DirectoryEntry>,
}

impl DirectoryListing {
    /// Reads `dir`, directories first, each group sorted by name.
    pub async fn read(dir: &Path, relative: &str) -> io::Result<Self> {
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            entries.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
            });
        }
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        Ok(Self {
            relative: relative.to_string(),
            entries,
        })
    }

    /// Entry names with directories suffixed by `/`, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .map(|entry| {
                if entry.is_dir {
                    format!("{}/", entry.name)
                } else {
                    entry.name.clone()
                }
            })
            .collect();
        names.sort();
        names
    }
}

/// Markup for the pages the server renders itself.
pub trait ViewRenderer: Send + Sync {
    fn render_listing(&self, listing: &DirectoryListing) -> String;

    fn render_login(&self) -> String;

    /// Listing for non-browser clients.
    fn render_listing_machine(&self, listing: &DirectoryListing) -> String {
        serde_json::to_string(&listing.names()).unwrap_or_else(|_| "[]".to_string())
    }
}

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const LISTING_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Index of /{{path}}</title>
<style>
body { font-family: sans-serif; margin: 2em; }
table { border-collapse: collapse; }
td { padding: 0.2em 1em; }
</style>
</head>
<body>
<h1>Index of /{{path}}</h1>
<table>
<tr><td><a href="/{{parent}}">../</a></td><td></td></tr>
{{rows}}
</table>
</body>
</html>
"#;

const LOGIN_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Sign in</title>
</head>
<body>
<h1>Sign in</h1>
<p>Send your name and password with HTTP Basic authentication, or register:</p>
<form method="post" action="/register" enctype="application/x-www-form-urlencoded">
<input name="user" placeholder="name">
<input name="password" type="password" placeholder="password">
<button type="submit">Register</button>
</form>
</body>
</html>
"#;

/// Listing template split at its placeholders.
struct Template {
    pieces: Vec<Piece>,
}

enum Piece {
    Literal(&'static str),
    Path,
    Parent,
    Rows,
}

impl Template {
    fn parse(source: &'static str) -> Self {
        let mut pieces = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start..].find("}}") else {
                break;
            };
            pieces.push(Piece::Literal(&rest[..start]));
            match &rest[start + 2..start + len] {
                "path" => pieces.push(Piece::Path),
                "parent" => pieces.push(Piece::Parent),
                "rows" => pieces.push(Piece::Rows),
                _ => pieces.push(Piece::Literal(&rest[start..start + len + 2])),
            }
            rest = &rest[start + len + 2..];
        }
        pieces.push(Piece::Literal(rest));
        Self { pieces }
    }
}

fn listing_template() -> &'static Template {
    static TEMPLATE: OnceLock<Template> = OnceLock::new();
    TEMPLATE.get_or_init(|| Template::parse(LISTING_TEMPLATE))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlView;

impl ViewRenderer for HtmlView {
    fn render_listing(&self, listing: &DirectoryListing) -> String {
        let base = if listing.relative.is_empty() {
            String::new()
        } else {
            format!("{}/", listing.relative)
        };
        let parent = match listing.relative.rsplit_once('/') {
            Some((parent, _)) => format!("{parent}/"),
            None => String::new(),
        };

        let mut rows = String::new();
        for entry in &listing.entries {
            let suffix = if entry.is_dir { "/" } else { "" };
            let href = utf8_percent_encode(&format!("{base}{}{suffix}", entry.name), PATH_SEGMENT)
                .to_string();
            let label = html_escape::encode_text(&entry.name);
            let size = if entry.is_dir {
                "-".to_string()
            } else {
                entry.size.to_string()
            };
            rows.push_str(&format!(
                "<tr><td><a href=\"/{}\">{label}{suffix}</a></td><td>{size}</td></tr>\n",
                html_escape::encode_double_quoted_attribute(&href)
            ));
        }

        let path = html_escape::encode_text(&listing.relative);
        let mut page = String::with_capacity(LISTING_TEMPLATE.len() + rows.len());
        for piece in &listing_template().pieces {
            match piece {
                Piece::Literal(text) => page.push_str(text),
                Piece::Path => page.push_str(&path),
                Piece::Parent => page.push_str(&html_escape::encode_double_quoted_attribute(
                    &utf8_percent_encode(&parent, PATH_SEGMENT).to_string(),
                )),
                Piece::Rows => page.push_str(&rows),
            }
        }
        page
    }

    fn render_login(&self) -> String {
        LOGIN_PAGE.to_string()
    }
}
