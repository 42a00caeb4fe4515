//! Markdown listing of the mirrored extensions

use crate::catalog::types::Catalog;

const HEADER: &str = "Icon|Name|Description|Author|Version|Date";
const SEPARATOR: &str = "----|----|-----------|------|-------|----";

/// Render one table row per catalog entry, in catalog order.
pub fn render(catalog: &Catalog) -> String {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');
    out.push_str(SEPARATOR);
    out.push('\n');

    for entry in catalog.extensions.values() {
        let row = [
            format!("![{}]({})", entry.name, entry.icon),
            format!("[{}]({})", entry.name, entry.url),
            escape_cell(&entry.description),
            format!("[{}]({})", entry.author, entry.author_url),
            format!("[{}]({})", entry.version, entry.artifact),
            entry.last_updated.clone(),
        ];
        out.push_str(&row.join("|"));
        out.push('\n');
    }
    out
}

// a literal pipe would end the cell
fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
