//! HTML pages. Placeholders are `{{name}}` (escaped) and `{{!name}}` (raw,
//! for fragments built here from already escaped parts).

use crate::{render::RenderedPage, state::HistoryEntry};

const UPLOAD: &str = include_str!("../templates/upload.html");
const SHARE: &str = include_str!("../templates/share.html");
const SIGN: &str = include_str!("../templates/sign.html");
const WAITING: &str = include_str!("../templates/waiting.html");
const HISTORY: &str = include_str!("../templates/history.html");

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Single pass, so substituted values are never scanned for placeholders.
fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after[..end].trim();
        let (raw, key) = match key.strip_prefix('!') {
            Some(key) => (true, key),
            None => (false, key),
        };
        match vars.iter().find(|(name, _)| *name == key) {
            Some((_, value)) if raw => out.push_str(value),
            Some((_, value)) => out.push_str(&escape(value)),
            None => log::warn!("Template placeholder {:?} has no value", key),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

pub fn upload_page(current_url: &str, current_qr_url: &str) -> String {
    fill(
        UPLOAD,
        &[("current_url", current_url), ("current_qr_url", current_qr_url)],
    )
}

pub fn share_page(doc_id: &str, filename: &str, sign_url: &str, qr_url: &str, current_url: &str) -> String {
    fill(
        SHARE,
        &[
            ("doc_id", doc_id),
            ("filename", filename),
            ("sign_url", sign_url),
            ("qr_url", qr_url),
            ("current_url", current_url),
        ],
    )
}

pub fn sign_page(doc_id: &str, pages: &[(RenderedPage, String)], api_url: &str) -> String {
    let mut fragment = String::new();
    for (page, name) in pages {
        fragment.push_str(&format!(
            "<figure class=\"page\" data-index=\"{index}\">\
             <img src=\"/render/{src}\" width=\"{w}\" height=\"{h}\" alt=\"Page {n}\">\
             <canvas width=\"{w}\" height=\"{h}\"></canvas>\
             <figcaption>Page {n} <button type=\"button\" class=\"clear\">Clear</button></figcaption>\
             </figure>\n",
            index = page.index,
            src = escape(name),
            w = page.width,
            h = page.height,
            n = page.index + 1,
        ));
    }
    fill(
        SIGN,
        &[("doc_id", doc_id), ("api_url", api_url), ("pages", &fragment)],
    )
}

pub fn waiting_page(api_current_url: &str) -> String {
    fill(WAITING, &[("api_current_url", api_current_url)])
}

pub fn history_page(entries: &[HistoryEntry]) -> String {
    let mut rows = String::new();
    for entry in entries {
        let download = match &entry.signed_file {
            Some(file) => format!(
                "<a href=\"/download/{}\">download</a>",
                escape(file)
            ),
            None => String::new(),
        };
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td><code>{}</code></td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&entry.at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
            match entry.event {
                crate::state::HistoryEvent::Uploaded => "uploaded",
                crate::state::HistoryEvent::Signed => "signed",
            },
            escape(entry.doc_id.as_str()),
            escape(&entry.filename),
            entry.pages_signed,
            download,
        ));
    }
    if rows.is_empty() {
        rows.push_str("<tr><td colspan=\"6\">Nothing yet.</td></tr>\n");
    }
    fill(HISTORY, &[("rows", &rows)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_escapes_unless_raw() {
        let html = fill("<p>{{name}}</p>{{!raw}}", &[("name", "<b>&"), ("raw", "<i>x</i>")]);
        assert_eq!(html, "<p>&lt;b&gt;&amp;</p><i>x</i>");
    }

    #[test]
    fn values_are_not_rescanned() {
        let html = fill("{{a}}|{{b}}", &[("a", "{{b}}"), ("b", "B")]);
        assert_eq!(html, "{{b}}|B");
    }

    #[test]
    fn unknown_and_unterminated_placeholders() {
        assert_eq!(fill("x{{missing}}y", &[]), "xy");
        assert_eq!(fill("x{{open", &[]), "x{{open");
    }

    #[test]
    fn share_page_escapes_filename() {
        let html = share_page("ab", "<script>.pdf", "http://h/sign/ab", "http://h/qr/ab", "http://h/current");
        assert!(html.contains("&lt;script&gt;.pdf"));
        assert!(!html.contains("<script>.pdf"));
    }
}
