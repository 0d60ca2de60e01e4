use std::fs;
use std::path::Path;

use expenso_core::domain::company::{ApprovalLevel, ApprovalMatrix, LevelConfig, RoleRef};
use serde::Deserialize;
use serde_json::json;

use crate::commands::CommandResult;

/// Operator-facing matrix document. Roles are labels such as `ACCOUNTANT`
/// or `custom:travel-desk`; a level table that is present is enabled unless
/// it says otherwise.
#[derive(Debug, Default, Deserialize)]
pub struct MatrixSpec {
    pub level3: Option<LevelSpec>,
    pub level4: Option<LevelSpec>,
    pub level5: Option<LevelSpec>,
}

#[derive(Debug, Deserialize)]
pub struct LevelSpec {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub roles: Vec<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl MatrixSpec {
    pub fn to_matrix(&self) -> Result<ApprovalMatrix, String> {
        Ok(ApprovalMatrix {
            level3: level_config(self.level3.as_ref())?,
            level4: level_config(self.level4.as_ref())?,
            level5: level_config(self.level5.as_ref())?,
        })
    }
}

fn level_config(spec: Option<&LevelSpec>) -> Result<LevelConfig, String> {
    let Some(spec) = spec else {
        return Ok(LevelConfig::default());
    };
    let approver_roles = spec.roles.iter().map(|label| parse_role(label)).collect::<Result<_, _>>()?;
    Ok(LevelConfig { enabled: spec.enabled, approver_roles })
}

pub(crate) fn parse_role(label: &str) -> Result<RoleRef, String> {
    RoleRef::parse_label(label).ok_or_else(|| format!("unknown role `{label}`"))
}

pub fn run(path: &Path) -> CommandResult {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                "check-matrix",
                "input",
                format!("could not read `{}`: {error}", path.display()),
                6,
            );
        }
    };

    let spec: MatrixSpec = match toml::from_str(&raw) {
        Ok(spec) => spec,
        Err(error) => {
            return CommandResult::failure(
                "check-matrix",
                "input",
                format!("could not parse `{}`: {error}", path.display()),
                6,
            );
        }
    };

    let matrix = match spec.to_matrix() {
        Ok(matrix) => matrix,
        Err(message) => return CommandResult::failure("check-matrix", "input", message, 6),
    };

    if let Err(error) = matrix.validate() {
        return CommandResult::failure(
            "check-matrix",
            "configuration",
            format!("{}: {error}", error.reason()),
            7,
        );
    }

    let enabled: Vec<String> = ApprovalLevel::all()
        .filter(|level| matrix.is_enabled(*level))
        .map(|level| level.to_string())
        .collect();

    CommandResult::success_with_data(
        "check-matrix",
        format!("matrix is valid; active levels: {}", enabled.join(", ")),
        Some(json!({ "enabled_levels": enabled, "matrix": matrix })),
    )
}
