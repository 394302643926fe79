//! Configuração do ticketflow carregada a partir de `ticketflow.toml`.
//!
//! A struct [`TicketflowConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `TICKETFLOW_DB` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::workflow::{LockPolicy, RenderOptions, RoleId};

pub const CONFIG_FILE: &str = "ticketflow.toml";
pub const DB_ENV_VAR: &str = "TICKETFLOW_DB";

/// Formato da saída de logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Configuração de nível superior carregada de `ticketflow.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketflowConfig {
    /// Caminho do banco SQLite.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Papel que, além do dono do status, precisa autorizar travas.
    #[serde(default)]
    pub lock_gate_role: Option<i64>,

    /// Prefixo dos ids de nó no fluxograma.
    #[serde(default = "default_node_prefix")]
    pub node_prefix: String,

    /// Direção do fluxograma (`TD`, `LR`, ...).
    #[serde(default = "default_direction")]
    pub direction: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

// Valor padrão para o banco: "ticketflow.db".
fn default_database() -> PathBuf {
    PathBuf::from("ticketflow.db")
}

// Valor padrão para o prefixo de nó: "S".
fn default_node_prefix() -> String {
    crate::workflow::flowchart::DEFAULT_NODE_PREFIX.to_string()
}

// Valor padrão para a direção: de cima para baixo.
fn default_direction() -> String {
    "TD".to_string()
}

impl Default for TicketflowConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            lock_gate_role: None,
            node_prefix: default_node_prefix(),
            direction: default_direction(),
            log_format: LogFormat::default(),
        }
    }
}

impl TicketflowConfig {
    /// Carrega a configuração de `ticketflow.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<TicketflowConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo para o banco.
        if let Ok(db) = std::env::var(DB_ENV_VAR)
            && !db.is_empty()
        {
            config.database = PathBuf::from(db);
        }

        Ok(config)
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            gate_role: self.lock_gate_role.map(RoleId),
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            node_prefix: self.node_prefix.clone(),
            direction: self.direction.clone(),
        }
    }
}
