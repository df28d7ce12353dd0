//! Run-configuration files.
//!
//! An INI-like format with three recognized sections. Section names have a
//! legacy alias each (`identifiers`, `files`); both spellings are
//! accepted, the canonical name is used internally. Every field is
//! required, unknown sections or fields are rejected, and validation runs
//! to completion before any blob or database mutation happens.
//!
//! ```ini
//! [problem]
//! challenge_problem_id = 1-0-2
//! team_id = 3
//! engine_id = 80f5daa5...
//!
//! [artifact]
//! description = EKF SLAM solution
//! version = 0.4
//! base = ~/slam
//! paths = bin, lib
//! config = slam.conf
//! input = data/input
//!
//! [evaluation]
//! evaluator = eval
//! ground_truth = data/truth
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::Fatal;

/// Composite challenge-problem key, written `id-major-minor`. Missing
/// trailing components default to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CpKey {
    pub id: i64,
    pub major: i64,
    pub minor: i64,
}

impl FromStr for CpKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<CpKey> {
        let mut parts = [0i64; 3];
        let pieces: Vec<&str> = s.split('-').filter(|p| !p.is_empty()).collect();
        if pieces.is_empty() || pieces.len() > 3 {
            return Err(
                Fatal::Config(format!("'{s}' is not a challenge problem id (N[-major[-minor]])"))
                    .into(),
            );
        }
        for (slot, piece) in parts.iter_mut().zip(&pieces) {
            *slot = piece.parse().map_err(|_| {
                Fatal::Config(format!("'{piece}' in challenge problem id '{s}' is not a number"))
            })?;
        }
        Ok(CpKey {
            id: parts[0],
            major: parts[1],
            minor: parts[2],
        })
    }
}

impl fmt::Display for CpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.id, self.major, self.minor)
    }
}

#[derive(Debug, Clone)]
pub struct ProblemSection {
    pub challenge_problem_id: CpKey,
    pub team_id: i64,
    pub engine_id: String,
}

#[derive(Debug, Clone)]
pub struct ArtifactSection {
    pub description: String,
    pub version: String,
    pub base: String,
    pub paths: Vec<String>,
    pub config: String,
    pub input: String,
}

#[derive(Debug, Clone)]
pub struct EvaluationSection {
    pub evaluator: Vec<String>,
    pub ground_truth: String,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub problem: ProblemSection,
    pub artifact: ArtifactSection,
    pub evaluation: EvaluationSection,
}

const PROBLEM_FIELDS: &[&str] = &["challenge_problem_id", "team_id", "engine_id"];
const ARTIFACT_FIELDS: &[&str] = &["description", "version", "base", "paths", "config", "input"];
const EVALUATION_FIELDS: &[&str] = &["evaluator", "ground_truth"];

pub fn load_run_config(path: &Path) -> anyhow::Result<RunConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Fatal::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_run_config(&raw)
}

pub fn parse_run_config(raw: &str) -> anyhow::Result<RunConfig> {
    let sections = split_sections(raw)?;

    for name in sections.keys() {
        if !matches!(name.as_str(), "problem" | "artifact" | "evaluation") {
            return Err(Fatal::Config(format!("unknown section [{name}]")).into());
        }
    }

    let problem = section_fields(&sections, "problem", PROBLEM_FIELDS)?;
    let artifact = section_fields(&sections, "artifact", ARTIFACT_FIELDS)?;
    let evaluation = section_fields(&sections, "evaluation", EVALUATION_FIELDS)?;

    let team_id: i64 = problem["team_id"].parse().map_err(|_| {
        Fatal::Config(format!(
            "field 'team_id' must be a number (got '{}')",
            problem["team_id"]
        ))
    })?;

    Ok(RunConfig {
        problem: ProblemSection {
            challenge_problem_id: problem["challenge_problem_id"].parse()?,
            team_id,
            engine_id: problem["engine_id"].clone(),
        },
        artifact: ArtifactSection {
            description: artifact["description"].clone(),
            version: artifact["version"].clone(),
            base: artifact["base"].clone(),
            paths: split_list(&artifact["paths"]),
            config: artifact["config"].clone(),
            input: artifact["input"].clone(),
        },
        evaluation: EvaluationSection {
            evaluator: split_list(&evaluation["evaluator"]),
            ground_truth: evaluation["ground_truth"].clone(),
        },
    })
}

/// Raw `[section] key = value` parse. Aliased section names are folded to
/// their canonical spelling here.
fn split_sections(raw: &str) -> anyhow::Result<BTreeMap<String, BTreeMap<String, String>>> {
    let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let canonical = match name.trim() {
                "problem" | "identifiers" => "problem",
                "artifact" | "files" => "artifact",
                other => other,
            };
            current = Some(canonical.to_string());
            sections.entry(canonical.to_string()).or_default();
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            Fatal::Config(format!("line {}: expected 'key = value'", lineno + 1))
        })?;
        let section = current
            .clone()
            .ok_or_else(|| Fatal::Config(format!("line {}: field outside any section", lineno + 1)))?;
        sections
            .entry(section)
            .or_default()
            .insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(sections)
}

/// Enforces the exact field set for one section: no missing, no extra, no
/// empty values.
fn section_fields<'a>(
    sections: &'a BTreeMap<String, BTreeMap<String, String>>,
    name: &str,
    expected: &[&str],
) -> anyhow::Result<&'a BTreeMap<String, String>> {
    let fields = sections
        .get(name)
        .ok_or_else(|| Fatal::Config(format!("missing section [{name}]")))?;

    for field in expected {
        match fields.get(*field) {
            None => {
                return Err(Fatal::Config(format!(
                    "missing required field '{field}' (in section [{name}])"
                ))
                .into())
            }
            Some(v) if v.is_empty() => {
                return Err(Fatal::Config(format!(
                    "field '{field}' (in section [{name}]) is empty"
                ))
                .into())
            }
            Some(_) => {}
        }
    }
    for field in fields.keys() {
        if !expected.contains(&field.as_str()) {
            return Err(Fatal::Config(format!(
                "please remove extra field '{field}' (in section [{name}])"
            ))
            .into());
        }
    }
    Ok(fields)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "\
[problem]
challenge_problem_id = 1-0-2
team_id = 3
engine_id = abc123

[artifact]
description = EKF SLAM
version = 0.4
base = /tmp/slam
paths = bin, lib
config = slam.conf
input = data/input

[evaluation]
evaluator = eval
ground_truth = data/truth
";

    #[test]
    fn parses_a_complete_config() {
        let cfg = parse_run_config(GOOD).unwrap();
        assert_eq!(
            cfg.problem.challenge_problem_id,
            CpKey { id: 1, major: 0, minor: 2 }
        );
        assert_eq!(cfg.problem.team_id, 3);
        assert_eq!(cfg.artifact.paths, vec!["bin", "lib"]);
        assert_eq!(cfg.evaluation.ground_truth, "data/truth");
    }

    #[test]
    fn accepts_legacy_section_aliases() {
        let aliased = GOOD
            .replace("[problem]", "[identifiers]")
            .replace("[artifact]", "[files]");
        assert!(parse_run_config(&aliased).is_ok());
    }

    #[test]
    fn rejects_missing_field() {
        let broken = GOOD.replace("team_id = 3\n", "");
        let err = parse_run_config(&broken).unwrap_err();
        assert!(err.to_string().contains("team_id"));
    }

    #[test]
    fn rejects_extra_field() {
        let broken = format!("{GOOD}\n[evaluation]\nbonus = 1\n");
        let err = parse_run_config(&broken).unwrap_err();
        assert!(err.to_string().contains("bonus"));
    }

    #[test]
    fn rejects_empty_required_value() {
        let broken = GOOD.replace("version = 0.4", "version =");
        assert!(parse_run_config(&broken).is_err());
    }

    #[test]
    fn rejects_unknown_section() {
        let broken = format!("{GOOD}\n[plotting]\nstyle = dark\n");
        let err = parse_run_config(&broken).unwrap_err();
        assert!(err.to_string().contains("plotting"));
    }

    #[test]
    fn cp_key_defaults_missing_components_to_zero() {
        assert_eq!("7".parse::<CpKey>().unwrap(), CpKey { id: 7, major: 0, minor: 0 });
        assert_eq!("7-2".parse::<CpKey>().unwrap(), CpKey { id: 7, major: 2, minor: 0 });
        assert!("x-1".parse::<CpKey>().is_err());
    }
}
