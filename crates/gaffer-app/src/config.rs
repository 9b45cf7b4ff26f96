// Configuration loading and validation (config/gaffer.toml).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use gaffer_core::{Position, SelectionStrategy, SolverLimits, SquadRules, TransferRules};
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_FILE: &str = "gaffer.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub squad: SquadRules,
    pub transfers: TransferRules,
    pub solver: SolverConfig,
    pub data_paths: DataPaths,
    pub db_path: String,
    pub model: Option<ModelConfig>,
}

// ---------------------------------------------------------------------------
// gaffer.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the whole file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    squad: SquadRules,
    transfers: TransferRules,
    solver: SolverConfig,
    data: DataPaths,
    database: DatabaseSection,
    #[serde(default)]
    model: Option<ModelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolverConfig {
    #[serde(default)]
    pub strategy: SelectionStrategy,
    /// Wall-clock limit for the exact search. Absent means unbounded.
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub fallback_to_greedy: bool,
    #[serde(default)]
    pub shortlist: bool,
}

fn default_true() -> bool {
    true
}

impl SolverConfig {
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::from_secs)
    }

    pub fn limits(&self) -> SolverLimits {
        SolverLimits {
            time_limit: self.time_limit(),
            max_nodes: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataPaths {
    pub pool: String,
}

/// Linear xPts model parameters. `features` points at an `id,value` CSV.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub coefficient: f64,
    pub intercept: f64,
    pub features: String,
    #[serde(default)]
    pub difficulty: Option<DifficultyConfig>,
}

/// Fixture-difficulty scaling applied on top of the linear model.
///
/// `fixtures` points at a `club,difficulty` CSV. `multipliers` maps each
/// position code to its factors for difficulty 1, 2, ... in order; a missing
/// position or difficulty leaves the score unscaled.
#[derive(Debug, Clone, Deserialize)]
pub struct DifficultyConfig {
    pub fixtures: String,
    #[serde(default)]
    pub multipliers: HashMap<String, Vec<f64>>,
}

impl DifficultyConfig {
    /// Highest fixture difficulty rating.
    pub const MAX_DIFFICULTY: u8 = 5;

    pub fn multiplier_table(&self) -> HashMap<(Position, u8), f64> {
        self.multipliers
            .iter()
            .filter_map(|(code, factors)| Some((Position::from_str_pos(code)?, factors)))
            .flat_map(|(position, factors)| {
                factors
                    .iter()
                    .zip(1..=Self::MAX_DIFFICULTY)
                    .map(move |(&factor, difficulty)| ((position, difficulty), factor))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/gaffer.toml` relative to `base_dir`.
///
/// Does not copy defaults; `load_config()` does that first.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        squad: file.squad,
        transfers: file.transfers,
        solver: file.solver,
        data_paths: file.data,
        db_path: file.database.path,
        model: file.model,
    };

    validate(&config)?;

    Ok(config)
}

/// Copy `defaults/gaffer.toml` to `config/gaffer.toml` unless the latter
/// already exists. Returns the path written, if any.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.exists() {
        return Ok(None);
    }
    let source = base_dir.join("defaults").join(CONFIG_FILE);
    if !source.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "neither config/{CONFIG_FILE} nor defaults/{CONFIG_FILE} found in {}",
                base_dir.display()
            ),
        });
    }

    let copy = |e: std::io::Error| ConfigError::DefaultsCopyError {
        message: format!("failed to copy {} to {}: {e}", source.display(), target.display()),
    };
    std::fs::create_dir_all(base_dir.join("config")).map_err(copy)?;
    std::fs::copy(&source, &target).map_err(copy)?;
    Ok(Some(target))
}

/// Load config from `base_dir`, copying defaults first.
pub fn load_config(base_dir: &Path) -> Result<Config, ConfigError> {
    ensure_config_file(base_dir)?;
    load_config_from(base_dir)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let squad = &config.squad;
    if squad.budget == 0 {
        return Err(invalid("squad.budget", "must be greater than 0"));
    }
    if squad.max_per_club == 0 {
        return Err(invalid("squad.max_per_club", "must be greater than 0"));
    }

    // Quotas must leave room for a legal starting eleven.
    let q = &squad.quotas;
    let quota_fields: &[(&str, usize, usize)] = &[
        ("squad.quotas.goalkeepers", q.goalkeepers, 1),
        ("squad.quotas.defenders", q.defenders, 3),
        ("squad.quotas.midfielders", q.midfielders, 3),
        ("squad.quotas.forwards", q.forwards, 1),
    ];
    for (name, value, min) in quota_fields {
        if value < min {
            return Err(invalid(name, format!("must be at least {min}, got {value}")));
        }
    }
    if q.total() - q.goalkeepers < 10 {
        return Err(invalid(
            "squad.quotas",
            format!("outfield quotas total {}, need at least 10", q.total() - q.goalkeepers),
        ));
    }

    let penalty = config.transfers.penalty_per_extra_transfer;
    if !penalty.is_finite() || penalty < 0.0 {
        return Err(invalid(
            "transfers.penalty_per_extra_transfer",
            format!("must be a non-negative number, got {penalty}"),
        ));
    }
    if config.transfers.max_transfers == Some(0) {
        return Err(invalid("transfers.max_transfers", "must be greater than 0 when set"));
    }

    if config.solver.time_limit_secs == Some(0) {
        return Err(invalid("solver.time_limit_secs", "must be greater than 0 when set"));
    }

    if config.data_paths.pool.trim().is_empty() {
        return Err(invalid("data.pool", "must not be empty"));
    }
    if config.db_path.trim().is_empty() {
        return Err(invalid("database.path", "must not be empty"));
    }

    if let Some(model) = &config.model {
        if !model.coefficient.is_finite() || !model.intercept.is_finite() {
            return Err(invalid("model", "coefficient and intercept must be finite"));
        }
        if model.features.trim().is_empty() {
            return Err(invalid("model.features", "must not be empty"));
        }
        if let Some(difficulty) = &model.difficulty {
            if difficulty.fixtures.trim().is_empty() {
                return Err(invalid("model.difficulty.fixtures", "must not be empty"));
            }
            let mut seen = HashSet::new();
            for (position, factors) in &difficulty.multipliers {
                let Some(parsed) = Position::from_str_pos(position) else {
                    return Err(invalid(
                        "model.difficulty.multipliers",
                        format!("unknown position '{position}'"),
                    ));
                };
                if !seen.insert(parsed) {
                    return Err(invalid(
                        "model.difficulty.multipliers",
                        format!("{parsed} is listed more than once"),
                    ));
                }
                if factors.len() > usize::from(DifficultyConfig::MAX_DIFFICULTY) {
                    return Err(invalid(
                        "model.difficulty.multipliers",
                        format!(
                            "{position} has {} factors, at most {} allowed",
                            factors.len(),
                            DifficultyConfig::MAX_DIFFICULTY
                        ),
                    ));
                }
                if factors.iter().any(|f| !f.is_finite() || *f < 0.0) {
                    return Err(invalid(
                        "model.difficulty.multipliers",
                        format!("{position} factors must be finite and non-negative"),
                    ));
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use gaffer_core::TransferStrategy;
    use std::fs;

    /// Path of the crate root, where `defaults/` lives.
    fn project_root() -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        if cwd.join("defaults").exists() {
            cwd
        } else if cwd.join("crates/gaffer-app/defaults").exists() {
            cwd.join("crates/gaffer-app")
        } else {
            panic!("Cannot locate defaults/ directory from CWD {:?}", cwd);
        }
    }

    /// Write `toml` as config/gaffer.toml under a fresh temp dir.
    fn temp_config(name: &str, toml: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE), toml).unwrap();
        tmp
    }

    const MINIMAL: &str = r#"
[squad]
budget = 1000

[transfers]

[solver]

[data]
pool = "pool.csv"

[database]
path = ":memory:"
"#;

    fn expect_field(err: ConfigError, expected: &str) {
        match err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, expected),
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn load_default_config_file() {
        let tmp = std::env::temp_dir().join("gaffer_config_defaults");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::copy(
            project_root().join("defaults").join(CONFIG_FILE),
            tmp.join("defaults").join(CONFIG_FILE),
        )
        .unwrap();

        let config = load_config(&tmp).expect("defaults should load");
        assert_eq!(config.squad.budget, 1000);
        assert_eq!(config.squad.max_per_club, 3);
        assert_eq!(config.squad.squad_size(), 15);
        assert_eq!(config.transfers.free_transfers, 1);
        assert!((config.transfers.penalty_per_extra_transfer - 4.0).abs() < f64::EPSILON);
        assert_eq!(config.transfers.strategy, TransferStrategy::Knapsack);
        assert_eq!(config.solver.strategy, SelectionStrategy::Exact);
        assert_eq!(config.solver.time_limit(), Some(Duration::from_secs(30)));
        assert!(config.solver.fallback_to_greedy);
        assert!(!config.solver.shortlist);
        assert_eq!(config.data_paths.pool, "data/pool.csv");
        assert_eq!(config.db_path, "gaffer.db");
        assert!(config.model.is_none());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let tmp = temp_config("gaffer_config_minimal", MINIMAL);
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.squad, SquadRules::new(1000));
        assert_eq!(config.transfers, TransferRules::default());
        assert_eq!(config.solver.time_limit(), None);
        assert_eq!(config.solver.limits(), SolverLimits::default());
        assert!(config.solver.fallback_to_greedy);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn model_section_parsed() {
        let toml = format!(
            "{MINIMAL}\n[model]\ncoefficient = 0.97\nintercept = 0.42\nfeatures = \"ict.csv\"\n"
        );
        let tmp = temp_config("gaffer_config_model", &toml);
        let config = load_config_from(&tmp).unwrap();
        let model = config.model.expect("model section");
        assert!((model.coefficient - 0.97).abs() < f64::EPSILON);
        assert_eq!(model.features, "ict.csv");
        assert!(model.difficulty.is_none());
        let _ = fs::remove_dir_all(&tmp);
    }

    const MODEL: &str = "[model]\ncoefficient = 1.0\nintercept = 0.0\nfeatures = \"ict.csv\"\n";

    #[test]
    fn difficulty_section_parsed() {
        let toml = format!(
            "{MINIMAL}\n{MODEL}\n[model.difficulty]\nfixtures = \"fixtures.csv\"\n\n\
             [model.difficulty.multipliers]\nFWD = [1.5, 1.2]\nGK = [1.1]\n"
        );
        let tmp = temp_config("gaffer_config_difficulty", &toml);
        let config = load_config_from(&tmp).unwrap();
        let difficulty = config.model.unwrap().difficulty.expect("difficulty section");
        assert_eq!(difficulty.fixtures, "fixtures.csv");

        let table = difficulty.multiplier_table();
        assert_eq!(table.len(), 3);
        assert_eq!(table[&(Position::Forward, 1)], 1.5);
        assert_eq!(table[&(Position::Forward, 2)], 1.2);
        assert_eq!(table[&(Position::Goalkeeper, 1)], 1.1);
        assert!(!table.contains_key(&(Position::Forward, 3)));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_bad_difficulty_multipliers() {
        for (name, factors) in [
            ("gaffer_config_difficulty_long", "[1.0, 1.0, 1.0, 1.0, 1.0, 1.0]"),
            ("gaffer_config_difficulty_negative", "[1.0, -0.5]"),
            ("gaffer_config_difficulty_twice", "[1.0]\nGKP = [1.0]\nGK = [1.0]"),
        ] {
            let toml = format!(
                "{MINIMAL}\n{MODEL}\n[model.difficulty]\nfixtures = \"fixtures.csv\"\n\n\
                 [model.difficulty.multipliers]\nDEF = {factors}\n"
            );
            let tmp = temp_config(name, &toml);
            expect_field(
                load_config_from(&tmp).unwrap_err(),
                "model.difficulty.multipliers",
            );
            let _ = fs::remove_dir_all(&tmp);
        }
    }

    #[test]
    fn rejects_unknown_multiplier_position() {
        let toml = format!(
            "{MINIMAL}\n{MODEL}\n[model.difficulty]\nfixtures = \"fixtures.csv\"\n\n\
             [model.difficulty.multipliers]\nMGR = [1.0]\n"
        );
        let tmp = temp_config("gaffer_config_difficulty_position", &toml);
        expect_field(
            load_config_from(&tmp).unwrap_err(),
            "model.difficulty.multipliers",
        );
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_budget() {
        let toml = MINIMAL.replace("budget = 1000", "budget = 0");
        let tmp = temp_config("gaffer_config_zero_budget", &toml);
        expect_field(load_config_from(&tmp).unwrap_err(), "squad.budget");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_quota_below_lineup_minimum() {
        let toml = MINIMAL.replace(
            "budget = 1000",
            "budget = 1000\n\n[squad.quotas]\ngoalkeepers = 2\ndefenders = 2\nmidfielders = 5\nforwards = 3",
        );
        let tmp = temp_config("gaffer_config_low_quota", &toml);
        expect_field(load_config_from(&tmp).unwrap_err(), "squad.quotas.defenders");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_negative_penalty() {
        let toml = MINIMAL.replace(
            "[transfers]",
            "[transfers]\npenalty_per_extra_transfer = -1.0",
        );
        let tmp = temp_config("gaffer_config_negative_penalty", &toml);
        expect_field(
            load_config_from(&tmp).unwrap_err(),
            "transfers.penalty_per_extra_transfer",
        );
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_time_limit() {
        let toml = MINIMAL.replace("[solver]", "[solver]\ntime_limit_secs = 0");
        let tmp = temp_config("gaffer_config_zero_time", &toml);
        expect_field(load_config_from(&tmp).unwrap_err(), "solver.time_limit_secs");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn unknown_strategy_is_parse_error() {
        let toml = MINIMAL.replace("[solver]", "[solver]\nstrategy = \"simplex\"");
        let tmp = temp_config("gaffer_config_bad_strategy", &toml);
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }), "{err}");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_file_is_file_not_found() {
        let tmp = std::env::temp_dir().join("gaffer_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_file_copies_default_once() {
        let tmp = std::env::temp_dir().join("gaffer_config_ensure");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults").join(CONFIG_FILE), MINIMAL).unwrap();

        let target = tmp.join("config").join(CONFIG_FILE);
        assert_eq!(ensure_config_file(&tmp).unwrap(), Some(target.clone()));
        assert_eq!(fs::read_to_string(&target).unwrap(), MINIMAL);

        // An edited copy is left alone.
        fs::write(&target, "# custom\n").unwrap();
        assert_eq!(ensure_config_file(&tmp).unwrap(), None);
        assert_eq!(fs::read_to_string(&target).unwrap(), "# custom\n");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_file_without_defaults_uses_existing_config() {
        let tmp = std::env::temp_dir().join("gaffer_config_no_defaults");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE), MINIMAL).unwrap();

        assert_eq!(ensure_config_file(&tmp).unwrap(), None);
        assert!(load_config(&tmp).is_ok());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_file_errors_when_both_missing() {
        let tmp = std::env::temp_dir().join("gaffer_config_both_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        match ensure_config_file(&tmp).unwrap_err() {
            ConfigError::DefaultsCopyError { message } => {
                assert!(message.contains("neither config/gaffer.toml nor defaults/gaffer.toml"));
            }
            other => panic!("expected DefaultsCopyError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }
}
