// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Data models for upstream exchanges and endpoint query strings.

use anyhow::Context;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const UPSTREAM_USER_AGENT: &str = "SIMAP/1.0";
pub const UPSTREAM_ACCEPT: &str = "application/json,text/plain,*/*";
pub const DEFAULT_CONTENT_TYPE: &str = "application/json; charset=utf-8";

const CPF_DIGITS: usize = 11;

/// A single GET against the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub url: Url,
    pub user_agent: String,
    pub accept: String,
}

impl UpstreamRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            user_agent: UPSTREAM_USER_AGENT.to_string(),
            accept: UPSTREAM_ACCEPT.to_string(),
        }
    }
}

/// A complete upstream response. Any status code counts as a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
    pub content_type: String,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Raw query string of `GET /api/agentes-publicos`.
#[derive(Debug, Default, Deserialize)]
pub struct AgentLookupQuery {
    #[serde(default)]
    pub codigo_municipio: Option<String>,
    #[serde(default)]
    pub exercicio_orcamento: Option<String>,
    #[serde(default)]
    pub cpf_servidor: Option<String>,
}

/// Validated public-agent lookup parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLookup {
    pub codigo_municipio: String,
    pub exercicio_orcamento: String,
    pub cpf_servidor: String,
}

impl AgentLookupQuery {
    pub fn validate(self) -> Result<AgentLookup, AppError> {
        let codigo_municipio = self
            .codigo_municipio
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        let exercicio_orcamento = self
            .exercicio_orcamento
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        let cpf_servidor = normalize_cpf(self.cpf_servidor.as_deref().unwrap_or_default());

        if codigo_municipio.is_empty() || !codigo_municipio.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::bad_request(
                "codigo_municipio is required and must be numeric",
            ));
        }

        if exercicio_orcamento.is_empty() {
            return Err(AppError::bad_request("exercicio_orcamento is required"));
        }

        if cpf_servidor.len() != CPF_DIGITS {
            return Err(AppError::bad_request(
                "cpf_servidor must contain exactly 11 digits",
            ));
        }

        Ok(AgentLookup {
            codigo_municipio: codigo_municipio.to_string(),
            exercicio_orcamento: exercicio_orcamento.to_string(),
            cpf_servidor,
        })
    }
}

impl AgentLookup {
    /// Build the upstream `agentes_publicos.json` URL under `base`.
    pub fn upstream_url(&self, base: &Url) -> anyhow::Result<Url> {
        let endpoint = format!(
            "{}/agentes_publicos.json",
            base.as_str().trim_end_matches('/')
        );

        Url::parse_with_params(
            &endpoint,
            &[
                ("codigo_municipio", self.codigo_municipio.as_str()),
                ("exercicio_orcamento", self.exercicio_orcamento.as_str()),
                ("cpf_servidor", self.cpf_servidor.as_str()),
            ],
        )
        .with_context(|| format!("invalid upstream endpoint {endpoint}"))
    }
}

/// Keep only the digits of a CPF, dropping dots, dashes and spaces.
pub fn normalize_cpf(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Query string of `GET /api/proxy`.
#[derive(Debug, Default, Deserialize)]
pub struct ProxyQuery {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EgressIpResponse {
    pub egress_ip: String,
}
