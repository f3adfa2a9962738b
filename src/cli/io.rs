//! JSON line output for the CLI
//!
//! Every line written to stdout is one JSON object.

use std::io::{self, Write};

use serde_json::{json, Value};

use crate::execution::Page;

use super::errors::CliResult;

/// JSON form of one emitted page
pub fn page_json(index: usize, page: &Page) -> Value {
    json!({
        "page": index,
        "rows": page.rows,
        "continuation": page.continuation(),
        "requestCharge": page.request_charge,
    })
}

/// Write one page to stdout
pub fn write_page(index: usize, page: &Page) -> CliResult<()> {
    write_value(&page_json(index, page))
}

/// Write an error line to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    write_value(&json!({
        "status": "error",
        "code": code,
        "message": message
    }))
}

/// Write a JSON value as one line to stdout
pub fn write_value(value: &Value) -> CliResult<()> {
    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_json_shape() {
        let page = Page::new(vec![json!({"id": "a"})], Some(String::new()), 2.5);
        let value = page_json(3, &page);

        assert_eq!(value["page"], 3);
        assert_eq!(value["rows"][0]["id"], "a");
        assert!(value["continuation"].is_null());
        assert_eq!(value["requestCharge"], 2.5);
    }
}
