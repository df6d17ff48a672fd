use crate::SplitCharacter;

/// A raw record split into its positional query arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    /// Identificator under which results of this record are grouped.
    /// Always the first field of the record.
    pub key: String,
    /// Positional arguments of the query, including the key.
    pub args: Vec<String>,
}

/// Splits `line` on the configured separator. Every line yields at least one
/// argument, which becomes the key.
pub fn parse_record(line: &str, split: &SplitCharacter) -> ParsedRecord {
    let args: Vec<String> = line.split(split.separator()).map(str::to_string).collect();
    let key = args[0].clone();

    ParsedRecord { key, args }
}
