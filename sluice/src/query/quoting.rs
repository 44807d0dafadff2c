use crate::connections::{EngineFamily, EngineType};

/// Identifier quoting convention for one SQL dialect.
///
/// Identifiers originating from user input (schema, table and column names)
/// must pass through [`QuoteStyle::quote`] before being rendered into SQL, so
/// an embedded quote character cannot terminate the identifier early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// ANSI double quotes: Postgres family and Snowflake.
    DoubleQuote,
    /// Backticks: MySQL family and BigQuery.
    Backtick,
}

impl QuoteStyle {
    /// Returns the quoting convention for an engine.
    pub fn for_engine(engine: EngineType) -> Self {
        match engine.family() {
            EngineFamily::Postgres | EngineFamily::Snowflake => QuoteStyle::DoubleQuote,
            EngineFamily::MySql | EngineFamily::BigQuery => QuoteStyle::Backtick,
            // MySQL quoting is the conservative default: backticks never
            // collide with ANSI identifiers.
            EngineFamily::Unsupported => QuoteStyle::Backtick,
        }
    }

    fn quote_char(&self) -> char {
        match self {
            QuoteStyle::DoubleQuote => '"',
            QuoteStyle::Backtick => '`',
        }
    }

    /// Quotes a single identifier, doubling any embedded quote character.
    pub fn quote(&self, ident: &str) -> String {
        let quote = self.quote_char();
        let doubled = ident.replace(quote, &format!("{quote}{quote}"));

        format!("{quote}{doubled}{quote}")
    }

    /// Quotes a dotted path part by part, e.g. `"db"."schema"."table"`.
    pub fn quote_path(&self, parts: &[&str]) -> String {
        parts
            .iter()
            .map(|part| self.quote(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Quotes a dotted path inside a single pair of quotes, e.g.
    /// `` `project.dataset.table` ``, the form BigQuery prefers.
    pub fn quote_joined_path(&self, parts: &[&str]) -> String {
        let quote = self.quote_char();
        let doubled = parts
            .iter()
            .map(|part| part.replace(quote, &format!("{quote}{quote}")))
            .collect::<Vec<_>>()
            .join(".");

        format!("{quote}{doubled}{quote}")
    }

    /// Strips the outer quotes and un-doubles embedded quote characters.
    ///
    /// Returns [`None`] if the input is not a quoted identifier of this style.
    pub fn unquote(&self, quoted: &str) -> Option<String> {
        let quote = self.quote_char();
        let inner = quoted
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))?;

        Some(inner.replace(&format!("{quote}{quote}"), &quote.to_string()))
    }

    /// Returns the positional placeholder for a 1-based parameter index.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            QuoteStyle::DoubleQuote => format!("${index}"),
            QuoteStyle::Backtick => "?".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_doubles_embedded_quotes() {
        let style = QuoteStyle::DoubleQuote;
        assert_eq!(style.quote("users"), "\"users\"");
        assert_eq!(style.quote("we\"ird"), "\"we\"\"ird\"");

        let style = QuoteStyle::Backtick;
        assert_eq!(style.quote("users"), "`users`");
        assert_eq!(style.quote("we`ird"), "`we``ird`");
    }

    #[test]
    fn quote_then_unquote_round_trips() {
        for style in [QuoteStyle::DoubleQuote, QuoteStyle::Backtick] {
            for ident in ["plain", "with\"quote", "with`tick", "\"", "``''\"\""] {
                assert_eq!(style.unquote(&style.quote(ident)).as_deref(), Some(ident));
            }
        }
    }

    #[test]
    fn paths_quote_each_part() {
        let style = QuoteStyle::DoubleQuote;
        assert_eq!(
            style.quote_path(&["db", "schema", "table"]),
            "\"db\".\"schema\".\"table\""
        );

        let style = QuoteStyle::Backtick;
        assert_eq!(
            style.quote_joined_path(&["project", "dataset", "table"]),
            "`project.dataset.table`"
        );
    }

    #[test]
    fn placeholders_follow_the_dialect() {
        assert_eq!(QuoteStyle::DoubleQuote.placeholder(2), "$2");
        assert_eq!(QuoteStyle::Backtick.placeholder(2), "?");
    }

    #[test]
    fn engines_map_to_the_expected_style() {
        assert_eq!(
            QuoteStyle::for_engine(EngineType::Postgres),
            QuoteStyle::DoubleQuote
        );
        assert_eq!(
            QuoteStyle::for_engine(EngineType::Snowflake),
            QuoteStyle::DoubleQuote
        );
        assert_eq!(
            QuoteStyle::for_engine(EngineType::MySql),
            QuoteStyle::Backtick
        );
        assert_eq!(
            QuoteStyle::for_engine(EngineType::BigQuery),
            QuoteStyle::Backtick
        );
    }
}
