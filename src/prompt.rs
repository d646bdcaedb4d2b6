//! Prompt Composer
//!
//! Renders retrieved schema into prompt text. Output depends only on the
//! input, so identical retrievals produce byte-identical prompts.

use crate::schema_rag::RetrievalResult;
use std::cmp::Ordering;

/// Used when retrieval yields nothing; asserts no schema.
pub const NO_SCHEMA_FALLBACK: &str =
    "(No relevant table schema was retrieved; write the query following common SQL conventions.)";

/// One header line per table, one `- <name> <type>` line per column and a
/// blank separator, in input order.
pub fn format_tables_for_prompt(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return NO_SCHEMA_FALLBACK.to_string();
    }

    let mut lines = Vec::new();
    for result in results {
        push_table_block(&mut lines, result);
    }
    lines.join("\n")
}

/// Like [`format_tables_for_prompt`] but at most `max_chars` long. Whole
/// tables are dropped, lowest score first, until the text fits; if none fit
/// the fallback sentence is returned.
pub fn format_tables_within_budget(results: &[RetrievalResult], max_chars: usize) -> String {
    let mut kept: Vec<usize> = (0..results.len()).collect();

    // Drop order: lowest score first, later input position first on ties.
    let mut drop_order = kept.clone();
    drop_order.sort_by(|&a, &b| {
        results[a]
            .score
            .partial_cmp(&results[b].score)
            .unwrap_or(Ordering::Equal)
            .then(b.cmp(&a))
    });
    let mut drop_order = drop_order.into_iter();

    loop {
        if kept.is_empty() {
            return NO_SCHEMA_FALLBACK.to_string();
        }
        let subset: Vec<RetrievalResult> = kept.iter().map(|&i| results[i].clone()).collect();
        let text = format_tables_for_prompt(&subset);
        if text.chars().count() <= max_chars {
            return text;
        }
        match drop_order.next() {
            Some(victim) => kept.retain(|&i| i != victim),
            None => return NO_SCHEMA_FALLBACK.to_string(),
        }
    }
}

fn push_table_block(lines: &mut Vec<String>, result: &RetrievalResult) {
    let table = &result.table;
    lines.push(format!("table {}:", table.name));
    for column in &table.columns {
        let mut line = format!("  - {} {}", column.name, column.data_type);
        if column.primary_key {
            line.push_str(" (PRIMARY KEY)");
        }
        lines.push(line);
    }
    lines.push(String::new());
}

/// Full generation prompt: fixed instructions, schema section, question.
pub fn build_generation_prompt(question: &str, schema_text: &str) -> String {
    format!(
        "You are a professional SQL generator for a SQLite analytical database.\n\
         Write one SQL query that answers the user's question.\n\
         Rules:\n\
         - Return only the SQL, without explanation\n\
         - The SQL must be valid and executable\n\
         - Only read-only SELECT queries are allowed; never use DELETE, DROP, UPDATE, INSERT or ALTER\n\
         \n\
         Database schema:\n\
         {}\n\
         \n\
         User question: {}\n",
        schema_text.trim_end(),
        question.trim()
    )
}
