/// Escape a value for use inside a single-quoted SQL literal. Postgres runs
/// with `standard_conforming_strings` on, so only quotes need doubling.
pub fn escape_sql_string_literal(s: &str) -> String {
    s.replace('\'', "''")
}
