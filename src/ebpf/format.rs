//! Tracepoint format parsing
//!
//! The structured probe reads `raw_syscalls:sys_enter` at fixed offsets. Before
//! attaching, the loader parses the running kernel's format description and
//! refuses to start if those offsets disagree, so a layout mismatch is caught
//! at session start instead of silently corrupting records.

use crate::{Result, SyscapError};
use std::fs;
use std::path::{Path, PathBuf};
use syscap_common::sys_enter;
use tracing::debug;

/// Candidate tracefs mount points, in order of preference.
const TRACEFS_ROOTS: [&str; 2] = ["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

/// One `field:` line of a tracepoint format file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatField {
    pub declaration: String,
    pub name: String,
    pub offset: usize,
    pub size: usize,
    pub signed: bool,
}

/// Parsed `events/<category>/<event>/format` file
#[derive(Debug, Clone, Default)]
pub struct TracepointFormat {
    pub name: String,
    pub id: Option<u32>,
    pub fields: Vec<FormatField>,
}

impl TracepointFormat {
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Reading tracepoint format from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut format = TracepointFormat::default();

        for line in text.lines() {
            let line = line.trim();
            if let Some(name) = line.strip_prefix("name:") {
                format.name = name.trim().to_string();
            } else if let Some(id) = line.strip_prefix("ID:") {
                let id = id.trim();
                format.id = Some(id.parse().map_err(|_| {
                    SyscapError::TracepointFormat(format!("invalid ID `{}`", id))
                })?);
            } else if line.starts_with("field:") {
                format.fields.push(parse_field(line)?);
            }
        }

        if format.fields.is_empty() {
            return Err(SyscapError::TracepointFormat(
                "no fields found".to_string(),
            ));
        }

        Ok(format)
    }

    pub fn field(&self, name: &str) -> Option<&FormatField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check that `id` and `args` sit where the structured probe reads them.
    pub fn validate_sys_enter(&self) -> Result<()> {
        expect_field(self, "id", sys_enter::ID_OFFSET, sys_enter::ID_SIZE)?;
        expect_field(self, "args", sys_enter::ARGS_OFFSET, sys_enter::ARGS_SIZE)?;
        Ok(())
    }
}

fn expect_field(format: &TracepointFormat, name: &str, offset: usize, size: usize) -> Result<()> {
    let field = format
        .field(name)
        .ok_or_else(|| SyscapError::ContextMismatch {
            field: name.to_string(),
            expected: format!("offset {} size {}", offset, size),
            found: "no such field".to_string(),
        })?;

    if field.offset != offset || field.size != size {
        return Err(SyscapError::ContextMismatch {
            field: name.to_string(),
            expected: format!("offset {} size {}", offset, size),
            found: format!("offset {} size {}", field.offset, field.size),
        });
    }

    Ok(())
}

/// Parse `field:unsigned long args[6];	offset:16;	size:48;	signed:0;`
fn parse_field(line: &str) -> Result<FormatField> {
    let mut declaration = None;
    let mut offset = None;
    let mut size = None;
    let mut signed = false;

    for part in line.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once(':')
            .ok_or_else(|| SyscapError::TracepointFormat(format!("bad entry `{}`", part)))?;
        match key.trim() {
            "field" => declaration = Some(value.trim().to_string()),
            "offset" => offset = Some(parse_number(value, line)?),
            "size" => size = Some(parse_number(value, line)?),
            "signed" => signed = value.trim() == "1",
            _ => {}
        }
    }

    let declaration = declaration
        .ok_or_else(|| SyscapError::TracepointFormat(format!("missing declaration in `{}`", line)))?;
    let name = field_name(&declaration)
        .ok_or_else(|| SyscapError::TracepointFormat(format!("unnamed field in `{}`", line)))?;

    Ok(FormatField {
        name,
        declaration,
        offset: offset
            .ok_or_else(|| SyscapError::TracepointFormat(format!("missing offset in `{}`", line)))?,
        size: size
            .ok_or_else(|| SyscapError::TracepointFormat(format!("missing size in `{}`", line)))?,
        signed,
    })
}

fn parse_number(value: &str, line: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| SyscapError::TracepointFormat(format!("bad number in `{}`", line)))
}

/// `unsigned long args[6]` -> `args`
fn field_name(declaration: &str) -> Option<String> {
    let last = declaration.split_whitespace().last()?;
    let name = last.split('[').next()?.trim_start_matches('*');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Find the mounted tracefs, preferring an explicit root.
pub fn locate_tracefs(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(root) = explicit {
        if root.join("events").is_dir() {
            return Ok(root.to_path_buf());
        }
        return Err(SyscapError::UnsupportedFeature(format!(
            "tracefs not found at {}",
            root.display()
        )));
    }

    TRACEFS_ROOTS
        .iter()
        .map(PathBuf::from)
        .find(|root| root.join("events").is_dir())
        .ok_or_else(|| {
            SyscapError::UnsupportedFeature(format!(
                "tracefs not mounted (looked in {})",
                TRACEFS_ROOTS.join(", ")
            ))
        })
}

pub fn sys_enter_format_path(tracefs_root: &Path) -> PathBuf {
    tracefs_root.join("events/raw_syscalls/sys_enter/format")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYS_ENTER_FORMAT: &str = "name: sys_enter
ID: 22
format:
\tfield:unsigned short common_type;\toffset:0;\tsize:2;\tsigned:0;
\tfield:unsigned char common_flags;\toffset:2;\tsize:1;\tsigned:0;
\tfield:unsigned char common_preempt_count;\toffset:3;\tsize:1;\tsigned:0;
\tfield:int common_pid;\toffset:4;\tsize:4;\tsigned:1;

\tfield:long id;\toffset:8;\tsize:8;\tsigned:1;
\tfield:unsigned long args[6];\toffset:16;\tsize:48;\tsigned:0;

print fmt: \"NR %ld (%lx, %lx, %lx, %lx, %lx, %lx)\", REC->id, REC->args[0], REC->args[1], REC->args[2], REC->args[3], REC->args[4], REC->args[5]
";

    #[test]
    fn test_parse_sys_enter_format() {
        let format = TracepointFormat::parse(SYS_ENTER_FORMAT).unwrap();

        assert_eq!(format.name, "sys_enter");
        assert_eq!(format.id, Some(22));
        assert_eq!(format.fields.len(), 6);

        let args = format.field("args").expect("args field");
        assert_eq!(args.offset, 16);
        assert_eq!(args.size, 48);
        assert!(!args.signed);
        assert_eq!(args.declaration, "unsigned long args[6]");

        assert!(format.field("id").unwrap().signed);
        format.validate_sys_enter().unwrap();
    }

    #[test]
    fn test_validate_detects_shifted_layout() {
        let shifted = SYS_ENTER_FORMAT
            .replace("offset:8;\tsize:8", "offset:16;\tsize:8")
            .replace("offset:16;\tsize:48", "offset:24;\tsize:48");
        let format = TracepointFormat::parse(&shifted).unwrap();

        let err = format.validate_sys_enter().unwrap_err();
        assert!(matches!(err, SyscapError::ContextMismatch { ref field, .. } if field == "id"));
    }

    #[test]
    fn test_validate_detects_missing_args() {
        let text = SYS_ENTER_FORMAT
            .lines()
            .filter(|l| !l.contains("args[6]"))
            .collect::<Vec<_>>()
            .join("\n");
        let format = TracepointFormat::parse(&text).unwrap();

        let err = format.validate_sys_enter().unwrap_err();
        assert!(err.to_string().contains("no such field"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TracepointFormat::parse("name: x\nformat:\n").is_err());
        assert!(TracepointFormat::parse("\tfield:long id;\toffset:eight;\tsize:8;").is_err());
    }

    #[test]
    fn test_field_name() {
        assert_eq!(field_name("const char * filename"), Some("filename".to_string()));
        assert_eq!(field_name("char *comm"), Some("comm".to_string()));
        assert_eq!(field_name("unsigned long args[6]"), Some("args".to_string()));
    }

    #[test]
    fn test_load_from_tracefs_layout() {
        let root = tempfile::tempdir().unwrap();
        let path = sys_enter_format_path(root.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, SYS_ENTER_FORMAT).unwrap();

        assert_eq!(locate_tracefs(Some(root.path())).unwrap(), root.path());
        let format = TracepointFormat::load(&path).unwrap();
        assert_eq!(format.field("id").unwrap().offset, 8);
    }

    #[test]
    fn test_locate_explicit_root_without_events() {
        let root = tempfile::tempdir().unwrap();
        assert!(locate_tracefs(Some(root.path())).is_err());
    }
}
