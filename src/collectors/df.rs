use crate::alerts::UsageReading;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("df output is empty")]
    Empty,
    #[error("df output has no header line, got '{0}'")]
    MissingHeader(String),
    #[error("malformed df row '{0}'")]
    MalformedRow(String),
    #[error("df output has no row for mount {mount} ({rows} rows)")]
    MountNotFound { mount: String, rows: usize },
    #[error("invalid usage value '{0}'")]
    InvalidPercent(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DfRow<'a> {
    capacity: &'a str,
    mount_point: String,
}

/// Parses `df -P` output, or a bare `NN%` line, into a reading for `mount`.
///
/// When no row names `mount` exactly and the output holds a single row, that
/// row wins: `df` reports the filesystem containing the path, whose mount
/// point can be a parent of it.
pub fn parse_df_output(
    host: &str,
    mount: &str,
    output: &str,
    timestamp: i64,
) -> Result<UsageReading, ParseError> {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let Some(first) = lines.first() else {
        return Err(ParseError::Empty);
    };

    if lines.len() == 1 && first.ends_with('%') && !first.contains(char::is_whitespace) {
        return Ok(UsageReading {
            host: host.to_string(),
            mount_point: mount.to_string(),
            used_percent: parse_percent(first)?,
            timestamp,
        });
    }

    if !first.starts_with("Filesystem") {
        return Err(ParseError::MissingHeader(first.to_string()));
    }

    let rows = lines[1..]
        .iter()
        .map(|line| parse_row(line))
        .collect::<Result<Vec<_>, _>>()?;

    let row = match rows.iter().find(|r| r.mount_point == mount) {
        Some(row) => row,
        None if rows.len() == 1 => &rows[0],
        None => {
            return Err(ParseError::MountNotFound {
                mount: mount.to_string(),
                rows: rows.len(),
            })
        }
    };

    Ok(UsageReading {
        host: host.to_string(),
        mount_point: row.mount_point.clone(),
        used_percent: parse_percent(row.capacity)?,
        timestamp,
    })
}

fn parse_row(line: &str) -> Result<DfRow<'_>, ParseError> {
    // Filesystem 1024-blocks Used Available Capacity Mounted-on...
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return Err(ParseError::MalformedRow(line.to_string()));
    }
    Ok(DfRow {
        capacity: fields[4],
        mount_point: fields[5..].join(" "),
    })
}

fn parse_percent(raw: &str) -> Result<u8, ParseError> {
    raw.strip_suffix('%')
        .and_then(|v| v.parse::<u8>().ok())
        .filter(|v| *v <= 100)
        .ok_or_else(|| ParseError::InvalidPercent(raw.to_string()))
}
