//! Delimited text source: one row per record, fields split by a delimiter.
//!
//! A record is one line, unless a double-quoted field is still open at the
//! end of the line: then the following lines belong to the same record and
//! the field keeps the line breaks as `\n`. Input that ends inside a quoted
//! field is an error.
//!
//! Without casts every field is yielded as `Value::Text`. With casts the
//! source enforces a schema contract: a value that cannot be converted fails
//! the run with [`EtlError::TypeConversion`]; there is no per-row recovery.

use crate::error::{EtlError, EtlResult};
use crate::row::{Row, Value};
use crate::source::DataSource;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Built-in field casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastKind {
    Text,
    Int,
    Float,
    Bool,
}

impl CastKind {
    fn target(self) -> &'static str {
        match self {
            CastKind::Text => "text",
            CastKind::Int => "integer",
            CastKind::Float => "float",
            CastKind::Bool => "boolean",
        }
    }

    /// Convert a raw field, `None` when the text is not a valid value.
    pub fn cast(self, raw: &str) -> Option<Value> {
        let trimmed = raw.trim();
        match self {
            CastKind::Text => Some(Value::Text(raw.to_string())),
            CastKind::Int => trimmed.parse::<i64>().ok().map(Value::Int),
            CastKind::Float => trimmed.parse::<f64>().ok().map(Value::Float),
            CastKind::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(Value::Bool(true)),
                "false" | "f" | "no" | "n" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
        }
    }
}

/// `{delimiter, fieldnames, casts}` configuration of a delimited source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelimitedConfig {
    pub delimiter: char,
    /// Explicit field names for header-free input; `None` reads the first line.
    pub fieldnames: Option<Vec<String>>,
    pub casts: BTreeMap<String, CastKind>,
}

impl Default for DelimitedConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            fieldnames: None,
            casts: BTreeMap::new(),
        }
    }
}

impl DelimitedConfig {
    pub fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            ..Self::default()
        }
    }

    pub fn with_fieldnames<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.fieldnames = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_cast(mut self, field: impl Into<String>, kind: CastKind) -> Self {
        self.casts.insert(field.into(), kind);
        self
    }

    pub fn validate(&self) -> EtlResult<()> {
        if self.delimiter == '"' || self.delimiter == '\n' || self.delimiter == '\r' {
            return Err(EtlError::config(format!(
                "invalid delimiter {:?}",
                self.delimiter
            )));
        }
        if let Some(names) = &self.fieldnames {
            self.check_casts(names)?;
        }
        Ok(())
    }

    fn check_casts(&self, names: &[String]) -> EtlResult<()> {
        for field in self.casts.keys() {
            if !names.iter().any(|n| n == field) {
                return Err(EtlError::config(format!(
                    "cast declared for unknown field '{field}'"
                )));
            }
        }
        Ok(())
    }
}

type CastFn = Box<dyn Fn(&str) -> Result<Value, String> + Send>;

enum Caster {
    Kind(CastKind),
    Custom { target: String, f: CastFn },
}

/// Delimited text source with optional typed columns.
pub struct DelimitedSource {
    reader: Box<dyn BufRead + Send>,
    path: Option<PathBuf>,
    config: DelimitedConfig,
    fieldnames: Option<Vec<String>>,
    custom: AHashMap<String, (String, CastFn)>,
    casters: Vec<Option<Caster>>,
    line_no: usize,
    buf: String,
}

impl DelimitedSource {
    /// Open a file. Sources opened from a path can be reset.
    pub fn open(path: impl AsRef<Path>, config: DelimitedConfig) -> EtlResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut source = Self::from_reader(BufReader::with_capacity(16384, file), config)?;
        source.path = Some(path);
        Ok(source)
    }

    /// Read from any buffered reader. Not restartable.
    pub fn from_reader(reader: impl BufRead + Send + 'static, config: DelimitedConfig) -> EtlResult<Self> {
        config.validate()?;
        let fieldnames = config.fieldnames.clone();
        let mut source = Self {
            reader: Box::new(reader),
            path: None,
            config,
            fieldnames,
            custom: AHashMap::new(),
            casters: Vec::new(),
            line_no: 0,
            buf: String::new(),
        };
        if source.fieldnames.is_none() {
            source.read_header()?;
        }
        source.build_casters()?;
        Ok(source)
    }

    /// Register a caller-supplied cast for one field. It takes precedence over
    /// a built-in cast for the same field.
    pub fn with_cast_fn(
        mut self,
        field: impl Into<String>,
        target: impl Into<String>,
        f: impl Fn(&str) -> Result<Value, String> + Send + 'static,
    ) -> EtlResult<Self> {
        self.custom.insert(field.into(), (target.into(), Box::new(f)));
        self.build_casters()?;
        Ok(self)
    }

    /// Field names in column order.
    pub fn fieldnames(&self) -> &[String] {
        self.fieldnames.as_deref().unwrap_or_default()
    }

    fn read_raw_line(&mut self) -> EtlResult<Option<String>> {
        self.buf.clear();
        if self.reader.read_line(&mut self.buf)? == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        Ok(Some(self.buf.trim_end_matches(['\n', '\r']).to_string()))
    }

    /// Next record split into fields. Blank lines between records are skipped.
    fn read_record(&mut self) -> EtlResult<Option<(String, Vec<String>)>> {
        let mut record = loop {
            match self.read_raw_line()? {
                None => return Ok(None),
                Some(line) if line.is_empty() => continue,
                Some(line) => break line,
            }
        };
        let start = self.line_no;
        loop {
            let (fields, open_quote) = scan_fields(&record, self.config.delimiter);
            if !open_quote {
                return Ok(Some((record, fields)));
            }
            let Some(next) = self.read_raw_line()? else {
                return Err(EtlError::TypeConversion {
                    field: "<row>".to_string(),
                    value: record,
                    target: "closed quoted field".to_string(),
                    line: start,
                });
            };
            record.push('\n');
            record.push_str(&next);
        }
    }

    fn read_header(&mut self) -> EtlResult<()> {
        let (_, names) = self
            .read_record()?
            .ok_or_else(|| EtlError::config("delimited input has no header line"))?;
        self.fieldnames = Some(names);
        Ok(())
    }

    fn build_casters(&mut self) -> EtlResult<()> {
        let names = self.fieldnames.clone().unwrap_or_default();
        self.config.check_casts(&names)?;
        for field in self.custom.keys() {
            if !names.iter().any(|n| n == field) {
                return Err(EtlError::config(format!(
                    "cast declared for unknown field '{field}'"
                )));
            }
        }
        // custom casts are moved into the caster table below
        let mut custom = std::mem::take(&mut self.custom);
        let mut previous = std::mem::take(&mut self.casters);
        self.casters = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                if let Some((target, f)) = custom.remove(name) {
                    Some(Caster::Custom { target, f })
                } else if let Some(Some(c @ Caster::Custom { .. })) =
                    previous.get_mut(i).map(Option::take)
                {
                    Some(c)
                } else {
                    self.config.casts.get(name).copied().map(Caster::Kind)
                }
            })
            .collect();
        Ok(())
    }

    fn convert(&self, field: &str, raw: &str, caster: Option<&Caster>) -> EtlResult<Value> {
        let fail = |target: &str| EtlError::TypeConversion {
            field: field.to_string(),
            value: raw.to_string(),
            target: target.to_string(),
            line: self.line_no,
        };
        match caster {
            None => Ok(Value::Text(raw.to_string())),
            Some(Caster::Kind(kind)) => kind.cast(raw).ok_or_else(|| fail(kind.target())),
            Some(Caster::Custom { target, f }) => f(raw).map_err(|_| fail(target)),
        }
    }
}

impl DataSource for DelimitedSource {
    fn next_row(&mut self) -> EtlResult<Option<Row>> {
        let Some((line, raw)) = self.read_record()? else {
            return Ok(None);
        };
        let names = self.fieldnames();
        if raw.len() != names.len() {
            return Err(EtlError::TypeConversion {
                field: "<row>".to_string(),
                value: line,
                target: format!("row of {} fields", names.len()),
                line: self.line_no,
            });
        }
        let mut row = Row::with_capacity(names.len());
        for (i, (name, value)) in names.iter().zip(&raw).enumerate() {
            let caster = self.casters.get(i).and_then(Option::as_ref);
            row.set(name.clone(), self.convert(name, value, caster)?);
        }
        Ok(Some(row))
    }

    fn reset(&mut self) -> EtlResult<()> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| EtlError::NotRestartable(self.describe()))?;
        self.reader = Box::new(BufReader::with_capacity(16384, File::open(path)?));
        self.line_no = 0;
        if self.config.fieldnames.is_none() {
            self.read_header()?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.path {
            Some(p) => format!("DelimitedSource({})", p.display()),
            None => "DelimitedSource".to_string(),
        }
    }
}

/// Split a record on `delimiter`, honouring double-quoted fields (`""`
/// inside quotes is a literal quote). The flag is set when the text ends
/// inside a quoted field.
fn scan_fields(line: &str, delimiter: char) -> (Vec<String>, bool) {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' if in_quotes => in_quotes = false,
            '"' if current.is_empty() => in_quotes = true,
            c if c == delimiter && !in_quotes => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    (fields, in_quotes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    const WINES: &str = "FixedAcidity,VolatileAcidity,Quality\n7.4,0.7,5\n7.8,0.88,6\n";

    fn wine_config() -> DelimitedConfig {
        DelimitedConfig::new(',')
            .with_cast("FixedAcidity", CastKind::Float)
            .with_cast("VolatileAcidity", CastKind::Float)
            .with_cast("Quality", CastKind::Int)
    }

    #[test]
    fn test_untyped_fields_are_text() {
        let input = "localfile\turl\na.html\thttp://x.org/a.html\n";
        let mut src = DelimitedSource::from_reader(Cursor::new(input), DelimitedConfig::new('\t')).unwrap();
        let row = src.next_row().unwrap().unwrap();
        assert_eq!(row.get("localfile"), Some(&Value::from("a.html")));
        assert_eq!(row.get("url"), Some(&Value::from("http://x.org/a.html")));
        assert!(src.next_row().unwrap().is_none());
    }

    #[test]
    fn test_typed_casts() {
        let mut src = DelimitedSource::from_reader(Cursor::new(WINES), wine_config()).unwrap();
        let row = src.next_row().unwrap().unwrap();
        assert_eq!(row.get("FixedAcidity"), Some(&Value::Float(7.4)));
        assert_eq!(row.get("Quality"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_cast_failure_is_type_conversion_error() {
        let input = "Quality\n5\ngood\n";
        let config = DelimitedConfig::new(',').with_cast("Quality", CastKind::Int);
        let mut src = DelimitedSource::from_reader(Cursor::new(input), config).unwrap();
        assert!(src.next_row().unwrap().is_some());
        match src.next_row().unwrap_err() {
            EtlError::TypeConversion { field, value, line, .. } => {
                assert_eq!(field, "Quality");
                assert_eq!(value, "good");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_header_free_input() {
        let config = DelimitedConfig::new(';')
            .with_fieldnames(["id", "name"])
            .with_cast("id", CastKind::Int);
        let mut src = DelimitedSource::from_reader(Cursor::new("1;a\n2;b\n"), config).unwrap();
        let row = src.next_row().unwrap().unwrap();
        assert_eq!(row.get("id"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_cast_for_unknown_field_is_config_error() {
        let config = DelimitedConfig::new(',').with_cast("pH", CastKind::Float);
        let err = DelimitedSource::from_reader(Cursor::new("a,b\n1,2\n"), config)
            .err()
            .unwrap();
        assert!(err.is_fatal_config());
    }

    #[test]
    fn test_field_count_mismatch() {
        let mut src =
            DelimitedSource::from_reader(Cursor::new("a,b\n1\n"), DelimitedConfig::default()).unwrap();
        assert!(matches!(
            src.next_row().unwrap_err(),
            EtlError::TypeConversion { line: 2, .. }
        ));
    }

    #[test]
    fn test_quoted_fields() {
        let (fields, open) = scan_fields(r#"1,"a,b","say ""hi""""#, ',');
        assert_eq!(fields, vec!["1", "a,b", r#"say "hi""#]);
        assert!(!open);
        assert!(scan_fields(r#"1,"multi"#, ',').1);
    }

    #[test]
    fn test_quoted_newline_stays_in_one_row() {
        let input = "id,note,score\r\n1,\"first\r\n\r\nthird\",7\r\n2,plain,8\r\n";
        let config = DelimitedConfig::new(',').with_cast("score", CastKind::Int);
        let mut src = DelimitedSource::from_reader(Cursor::new(input), config).unwrap();
        let row = src.next_row().unwrap().unwrap();
        assert_eq!(row.get("note"), Some(&Value::from("first\n\nthird")));
        assert_eq!(row.get("score"), Some(&Value::Int(7)));
        let row = src.next_row().unwrap().unwrap();
        assert_eq!(row.get("id"), Some(&Value::from("2")));
        assert!(src.next_row().unwrap().is_none());
    }

    #[test]
    fn test_unterminated_quote_fails_at_record_start() {
        let input = "id,note\n1,ok\n2,\"never closed\nstill open\n";
        let mut src = DelimitedSource::from_reader(Cursor::new(input), DelimitedConfig::default()).unwrap();
        assert!(src.next_row().unwrap().is_some());
        match src.next_row().unwrap_err() {
            EtlError::TypeConversion { line, target, .. } => {
                assert_eq!(line, 3);
                assert_eq!(target, "closed quoted field");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_custom_cast_fn() {
        let src = DelimitedSource::from_reader(Cursor::new("size\n12kb\n"), DelimitedConfig::default())
            .unwrap();
        let mut src = src
            .with_cast_fn("size", "kilobytes", |raw| {
                raw.strip_suffix("kb")
                    .and_then(|n| n.parse::<i64>().ok())
                    .map(|n| Value::Int(n * 1024))
                    .ok_or_else(|| raw.to_string())
            })
            .unwrap();
        assert_eq!(src.next_row().unwrap().unwrap().get("size"), Some(&Value::Int(12288)));
    }

    #[test]
    fn test_reset_reopens_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(WINES.as_bytes()).unwrap();
        let mut src = DelimitedSource::open(file.path(), wine_config()).unwrap();
        assert_eq!(src.by_ref_count(), 2);
        src.reset().unwrap();
        assert_eq!(src.by_ref_count(), 2);
    }

    #[test]
    fn test_reader_source_is_not_restartable() {
        let mut src = DelimitedSource::from_reader(Cursor::new(WINES), wine_config()).unwrap();
        assert!(matches!(src.reset().unwrap_err(), EtlError::NotRestartable(_)));
    }

    impl DelimitedSource {
        fn by_ref_count(&mut self) -> usize {
            let mut n = 0;
            while self.next_row().unwrap().is_some() {
                n += 1;
            }
            n
        }
    }
}
