use crate::config::types::{
    Config, CrawlMode, CrawlerConfig, FetchConfig, OutputConfig, ScopeConfig, SiteConfig,
};
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_fetch_config(&config.fetch)?;
    validate_output_config(&config.output)?;

    match config.mode {
        CrawlMode::Link => {
            let scope = config.scope.as_ref().ok_or_else(|| {
                ConfigError::Validation("link mode requires a [scope] section".to_string())
            })?;
            validate_scope_config(scope)?;
        }
        CrawlMode::Partition => {
            let site = config.site.as_ref().ok_or_else(|| {
                ConfigError::Validation("partition mode requires a [site] section".to_string())
            })?;
            validate_site_config(site)?;
        }
    }

    if let Some(endpoint) = &config.agent.endpoint {
        Url::parse(endpoint)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid agent endpoint: {}", e)))?;
    }

    Ok(())
}

/// Validates worker configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 64 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 64, got {}",
            config.workers
        )));
    }

    if config.max_unit_attempts < 1 {
        return Err(ConfigError::Validation(
            "max-unit-attempts must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates fetch configuration
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.retries > 10 {
        return Err(ConfigError::Validation(format!(
            "retries must be <= 10, got {}",
            config.retries
        )));
    }

    if config.timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "timeout-ms must be >= 100ms, got {}ms",
            config.timeout_ms
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.data_dir.is_empty() {
        return Err(ConfigError::Validation(
            "data-dir cannot be empty".to_string(),
        ));
    }

    if config.state_file.is_empty() {
        return Err(ConfigError::Validation(
            "state-file cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the link-following scope
fn validate_scope_config(config: &ScopeConfig) -> Result<(), ConfigError> {
    validate_http_url("start-url", &config.start_url)?;

    if config.allow.is_empty() {
        return Err(ConfigError::Validation(
            "scope must have at least one [[scope.allow]] entry".to_string(),
        ));
    }

    for prefix in &config.deny_query_prefixes {
        if prefix.is_empty() {
            return Err(ConfigError::Validation(
                "deny-query-prefixes cannot contain an empty prefix".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates selector-driven site navigation
fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    validate_http_url("start-url", &config.start_url)?;

    validate_selector(&config.ready_selector)?;
    validate_selector(&config.child_selector)?;
    for selector in [
        &config.detail_ready_selector,
        &config.next_page_selector,
        &config.partition_selector,
    ]
    .into_iter()
    .flatten()
    {
        validate_selector(selector)?;
    }

    if config.partitions.is_empty() && config.partition_selector.is_none() {
        return Err(ConfigError::Validation(
            "site needs [[site.partitions]] entries or a partition-selector".to_string(),
        ));
    }

    for partition in &config.partitions {
        if partition.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "partition name cannot be empty".to_string(),
            ));
        }
        validate_http_url("partition url", &partition.url)?;
    }

    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use http or https",
            field, value
        )));
    }

    Ok(())
}

/// Selectors are evaluated in the browser, but scraper's parser catches typos early
fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidSelector(selector.to_string()))
}
