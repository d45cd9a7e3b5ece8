//! Token filter engine.
//!
//! Filters are data: every field of [`FilterConfig`] is optional and an
//! absent field is disabled. Facts the engine cannot establish count as
//! violations for any filter that requires them, so an RPC blackout never
//! waves a token through.

use chrono::Utc;
use rust_decimal::Decimal;
use sniper_core::types::{
    FilterConfig, FilterPreset, FilterResult, TokenFacts, Violation, ViolationSeverity,
};
use tracing::debug;

pub struct FilterEngine;

impl FilterEngine {
    /// Concrete configuration for a preset.
    pub fn preset(preset: FilterPreset) -> FilterConfig {
        match preset {
            FilterPreset::Conservative => FilterConfig {
                require_mint_disabled: Some(true),
                require_freeze_disabled: Some(true),
                min_liquidity_sol: Some(Decimal::from(25)),
                require_liquidity_locked: Some(true),
                min_liquidity_lock_pct: Some(Decimal::from(80)),
                max_top10_holders_pct: Some(Decimal::from(40)),
                max_single_holder_pct: Some(Decimal::from(15)),
                min_holders: Some(200),
                max_developer_pct: Some(Decimal::from(5)),
                max_buy_tax: Some(Decimal::from(2)),
                max_sell_tax: Some(Decimal::from(2)),
                max_risk_score: Some(30),
                min_confidence: Some(Decimal::new(8, 1)),
                require_sell_simulation: Some(true),
                require_metadata: Some(true),
                ..Default::default()
            },
            FilterPreset::Balanced => FilterConfig {
                require_mint_disabled: Some(true),
                require_freeze_disabled: Some(true),
                min_liquidity_sol: Some(Decimal::from(10)),
                max_top10_holders_pct: Some(Decimal::from(60)),
                max_single_holder_pct: Some(Decimal::from(25)),
                min_holders: Some(50),
                max_developer_pct: Some(Decimal::from(15)),
                max_buy_tax: Some(Decimal::from(5)),
                max_sell_tax: Some(Decimal::from(5)),
                max_risk_score: Some(60),
                min_confidence: Some(Decimal::new(5, 1)),
                require_sell_simulation: Some(true),
                ..Default::default()
            },
            FilterPreset::Aggressive => FilterConfig {
                min_liquidity_sol: Some(Decimal::from(2)),
                max_top10_holders_pct: Some(Decimal::from(90)),
                max_sell_tax: Some(Decimal::from(25)),
                max_risk_score: Some(70),
                require_sell_simulation: Some(true),
                ..Default::default()
            },
            FilterPreset::Custom => FilterConfig::default(),
        }
    }

    /// Evaluate a configuration against extracted token facts.
    pub fn evaluate(
        config: &FilterConfig,
        preset: FilterPreset,
        facts: &TokenFacts,
    ) -> FilterResult {
        let mut violations = Vec::new();

        // Allow list wins outright; deny list loses outright.
        if let Some(whitelist) = &config.whitelist {
            if whitelist.contains(&facts.mint) {
                return FilterResult {
                    passed: true,
                    violations,
                    preset,
                    token_facts: facts.clone(),
                    checked_at: Utc::now(),
                };
            }
        }
        if let Some(blacklist) = &config.blacklist {
            if blacklist.contains(&facts.mint) {
                violations.push(Violation {
                    filter: "blacklist".to_string(),
                    severity: ViolationSeverity::High,
                    message: "token is blacklisted".to_string(),
                });
            }
        }

        check_authority(config, facts, &mut violations);
        check_liquidity(config, facts, &mut violations);
        check_holders(config, facts, &mut violations);
        check_taxes(config, facts, &mut violations);
        check_pool(config, facts, &mut violations);
        check_socials(config, facts, &mut violations);
        check_honeypot(config, facts, &mut violations);
        check_metadata(config, facts, &mut violations);

        let passed = violations.is_empty();
        if !passed {
            debug!(
                mint = %facts.mint,
                violations = violations.len(),
                "Token failed filters"
            );
        }

        FilterResult {
            passed,
            violations,
            preset,
            token_facts: facts.clone(),
            checked_at: Utc::now(),
        }
    }
}

fn violation(
    violations: &mut Vec<Violation>,
    filter: &str,
    severity: ViolationSeverity,
    message: String,
) {
    violations.push(Violation {
        filter: filter.to_string(),
        severity,
        message,
    });
}

/// A required fact that could not be established violates the filter.
fn require_known<T: Copy>(
    value: Option<T>,
    violations: &mut Vec<Violation>,
    filter: &str,
    severity: ViolationSeverity,
) -> Option<T> {
    if value.is_none() {
        violation(
            violations,
            filter,
            severity,
            format!("{filter}: fact could not be established"),
        );
    }
    value
}

fn check_authority(config: &FilterConfig, facts: &TokenFacts, violations: &mut Vec<Violation>) {
    if config.require_mint_disabled == Some(true) && facts.mint_authority.is_some() {
        violation(
            violations,
            "require_mint_disabled",
            ViolationSeverity::High,
            "mint authority is still enabled".to_string(),
        );
    }
    if config.require_freeze_disabled == Some(true) && facts.freeze_authority.is_some() {
        violation(
            violations,
            "require_freeze_disabled",
            ViolationSeverity::High,
            "freeze authority is still enabled".to_string(),
        );
    }
}

fn check_liquidity(config: &FilterConfig, facts: &TokenFacts, violations: &mut Vec<Violation>) {
    if let Some(min) = config.min_liquidity_sol {
        if let Some(liquidity) =
            require_known(facts.liquidity_sol, violations, "min_liquidity_sol", ViolationSeverity::Medium)
        {
            if liquidity < min {
                violation(
                    violations,
                    "min_liquidity_sol",
                    ViolationSeverity::Medium,
                    format!("liquidity {liquidity} SOL below minimum {min} SOL"),
                );
            }
        }
    }
    if let Some(max) = config.max_liquidity_sol {
        if let Some(liquidity) = facts.liquidity_sol {
            if liquidity > max {
                violation(
                    violations,
                    "max_liquidity_sol",
                    ViolationSeverity::Low,
                    format!("liquidity {liquidity} SOL above maximum {max} SOL"),
                );
            }
        }
    }
    if config.require_liquidity_locked == Some(true) && facts.liquidity_locked != Some(true) {
        violation(
            violations,
            "require_liquidity_locked",
            ViolationSeverity::High,
            "liquidity is not verifiably locked".to_string(),
        );
    }
    if let Some(min_pct) = config.min_liquidity_lock_pct {
        if let Some(pct) = require_known(
            facts.liquidity_lock_pct,
            violations,
            "min_liquidity_lock_pct",
            ViolationSeverity::Medium,
        ) {
            if pct < min_pct {
                violation(
                    violations,
                    "min_liquidity_lock_pct",
                    ViolationSeverity::Medium,
                    format!("only {pct}% of liquidity locked, need {min_pct}%"),
                );
            }
        }
    }
}

fn check_holders(config: &FilterConfig, facts: &TokenFacts, violations: &mut Vec<Violation>) {
    if let Some(max) = config.max_top10_holders_pct {
        if let Some(pct) = require_known(
            facts.top10_holders_pct,
            violations,
            "max_top10_holders_pct",
            ViolationSeverity::Medium,
        ) {
            if pct > max {
                violation(
                    violations,
                    "max_top10_holders_pct",
                    ViolationSeverity::Medium,
                    format!("top-10 holders own {pct}%, cap is {max}%"),
                );
            }
        }
    }
    if let Some(max) = config.max_single_holder_pct {
        if let Some(pct) = facts.single_holder_pct {
            if pct > max {
                violation(
                    violations,
                    "max_single_holder_pct",
                    ViolationSeverity::Medium,
                    format!("largest holder owns {pct}%, cap is {max}%"),
                );
            }
        }
    }
    if let Some(min) = config.min_holders {
        if let Some(count) = facts.holder_count {
            if count < min {
                violation(
                    violations,
                    "min_holders",
                    ViolationSeverity::Low,
                    format!("{count} holders, need {min}"),
                );
            }
        }
    }
    if let Some(max) = config.max_developer_pct {
        if let Some(pct) = facts.developer_pct {
            if pct > max {
                violation(
                    violations,
                    "max_developer_pct",
                    ViolationSeverity::Medium,
                    format!("developer owns {pct}%, cap is {max}%"),
                );
            }
        }
    }
}

fn check_taxes(config: &FilterConfig, facts: &TokenFacts, violations: &mut Vec<Violation>) {
    if let Some(max) = config.max_buy_tax {
        if let Some(tax) = facts.buy_tax_pct {
            if tax > max {
                violation(
                    violations,
                    "max_buy_tax",
                    ViolationSeverity::Medium,
                    format!("buy tax {tax}% above cap {max}%"),
                );
            }
        }
    }
    if let Some(max) = config.max_sell_tax {
        if let Some(tax) = facts.sell_tax_pct {
            if tax > max {
                violation(
                    violations,
                    "max_sell_tax",
                    ViolationSeverity::High,
                    format!("sell tax {tax}% above cap {max}%"),
                );
            }
        }
    }
}

fn check_pool(config: &FilterConfig, facts: &TokenFacts, violations: &mut Vec<Violation>) {
    if let Some(min) = config.min_pool_supply_pct {
        if let Some(pct) = facts.pool_supply_pct {
            if pct < min {
                violation(
                    violations,
                    "min_pool_supply_pct",
                    ViolationSeverity::Medium,
                    format!("pool holds {pct}% of supply, need {min}%"),
                );
            }
        }
    }
    if let Some(max) = config.max_pool_supply_pct {
        if let Some(pct) = facts.pool_supply_pct {
            if pct > max {
                violation(
                    violations,
                    "max_pool_supply_pct",
                    ViolationSeverity::Low,
                    format!("pool holds {pct}% of supply, cap is {max}%"),
                );
            }
        }
    }
}

fn check_socials(config: &FilterConfig, facts: &TokenFacts, violations: &mut Vec<Violation>) {
    let socials = [
        ("require_twitter", config.require_twitter, facts.has_twitter),
        ("require_website", config.require_website, facts.has_website),
        ("require_telegram", config.require_telegram, facts.has_telegram),
    ];
    for (filter, required, fact) in socials {
        if required == Some(true) && fact != Some(true) {
            violation(
                violations,
                filter,
                ViolationSeverity::Low,
                format!("{}: not present", filter.trim_start_matches("require_")),
            );
        }
    }
}

fn check_honeypot(config: &FilterConfig, facts: &TokenFacts, violations: &mut Vec<Violation>) {
    if let Some(max) = config.max_risk_score {
        if let Some(score) =
            require_known(facts.risk_score, violations, "max_risk_score", ViolationSeverity::High)
        {
            if score > max {
                violation(
                    violations,
                    "max_risk_score",
                    ViolationSeverity::High,
                    format!("risk score {score} above cap {max}"),
                );
            }
        }
    }
    if let Some(min) = config.min_confidence {
        if let Some(confidence) = facts.risk_confidence {
            if confidence < min {
                violation(
                    violations,
                    "min_confidence",
                    ViolationSeverity::Medium,
                    format!("verdict confidence {confidence} below {min}"),
                );
            }
        }
    }
    if config.require_sell_simulation == Some(true) && facts.sell_simulation_ok != Some(true) {
        violation(
            violations,
            "require_sell_simulation",
            ViolationSeverity::High,
            "sell simulation did not succeed".to_string(),
        );
    }
}

fn check_metadata(config: &FilterConfig, facts: &TokenFacts, violations: &mut Vec<Violation>) {
    if config.require_metadata == Some(true) && facts.has_metadata != Some(true) {
        violation(
            violations,
            "require_metadata",
            ViolationSeverity::Low,
            "no on-chain metadata account".to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_facts() -> TokenFacts {
        TokenFacts {
            mint: "Mint".to_string(),
            mint_authority: None,
            freeze_authority: None,
            liquidity_sol: Some(Decimal::from(12)),
            liquidity_locked: Some(true),
            liquidity_lock_pct: Some(Decimal::from(95)),
            top10_holders_pct: Some(Decimal::from(35)),
            single_holder_pct: Some(Decimal::from(10)),
            developer_pct: Some(Decimal::from(4)),
            holder_count: Some(500),
            buy_tax_pct: Some(Decimal::ONE),
            sell_tax_pct: Some(Decimal::ONE),
            pool_supply_pct: Some(Decimal::from(40)),
            has_twitter: Some(true),
            has_website: Some(true),
            has_telegram: Some(true),
            risk_score: Some(25),
            risk_confidence: Some(Decimal::ONE),
            sell_simulation_ok: Some(true),
            has_metadata: Some(true),
        }
    }

    #[test]
    fn test_empty_config_passes_everything() {
        let result = FilterEngine::evaluate(
            &FilterConfig::default(),
            FilterPreset::Custom,
            &TokenFacts::new("Mint"),
        );
        assert!(result.passed);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn test_healthy_token_passes_balanced() {
        let config = FilterEngine::preset(FilterPreset::Balanced);
        let result = FilterEngine::evaluate(&config, FilterPreset::Balanced, &healthy_facts());
        assert!(result.passed, "violations: {:?}", result.violations);
    }

    #[test]
    fn test_low_liquidity_names_the_filter() {
        let config = FilterConfig {
            min_liquidity_sol: Some(Decimal::from(10)),
            ..Default::default()
        };
        let facts = TokenFacts {
            liquidity_sol: Some(Decimal::from(2)),
            ..healthy_facts()
        };
        let result = FilterEngine::evaluate(&config, FilterPreset::Custom, &facts);
        assert!(!result.passed);
        assert!(result.violated_filters().contains(&"min_liquidity_sol"));
    }

    #[test]
    fn test_unknown_required_fact_is_a_violation() {
        let config = FilterConfig {
            max_risk_score: Some(70),
            ..Default::default()
        };
        let facts = TokenFacts {
            risk_score: None,
            ..healthy_facts()
        };
        let result = FilterEngine::evaluate(&config, FilterPreset::Custom, &facts);
        assert!(!result.passed);
        assert_eq!(result.violations[0].filter, "max_risk_score");
    }

    #[test]
    fn test_enabled_authority_is_high_severity() {
        let config = FilterEngine::preset(FilterPreset::Conservative);
        let facts = TokenFacts {
            mint_authority: Some("Authority111".to_string()),
            ..healthy_facts()
        };
        let result = FilterEngine::evaluate(&config, FilterPreset::Conservative, &facts);
        let violation = result
            .violations
            .iter()
            .find(|v| v.filter == "require_mint_disabled")
            .unwrap();
        assert_eq!(violation.severity, ViolationSeverity::High);
    }

    #[test]
    fn test_whitelist_short_circuits_other_filters() {
        let config = FilterConfig {
            whitelist: Some(vec!["Mint".to_string()]),
            max_risk_score: Some(1),
            ..Default::default()
        };
        let facts = TokenFacts {
            risk_score: Some(99),
            ..healthy_facts()
        };
        let result = FilterEngine::evaluate(&config, FilterPreset::Custom, &facts);
        assert!(result.passed);
    }

    #[test]
    fn test_blacklist_rejects() {
        let config = FilterConfig {
            blacklist: Some(vec!["Mint".to_string()]),
            ..Default::default()
        };
        let result = FilterEngine::evaluate(&config, FilterPreset::Custom, &healthy_facts());
        assert!(!result.passed);
        assert_eq!(result.violations[0].filter, "blacklist");
        assert_eq!(result.violations[0].severity, ViolationSeverity::High);
    }

    #[test]
    fn test_missing_socials_are_low_severity() {
        let config = FilterConfig {
            require_twitter: Some(true),
            require_telegram: Some(true),
            ..Default::default()
        };
        let facts = TokenFacts {
            has_twitter: Some(false),
            has_telegram: None,
            ..healthy_facts()
        };
        let result = FilterEngine::evaluate(&config, FilterPreset::Custom, &facts);
        assert_eq!(result.violations.len(), 2);
        assert!(result
            .violations
            .iter()
            .all(|v| v.severity == ViolationSeverity::Low));
    }

    #[test]
    fn test_presets_tighten_monotonically() {
        let conservative = FilterEngine::preset(FilterPreset::Conservative);
        let balanced = FilterEngine::preset(FilterPreset::Balanced);
        let aggressive = FilterEngine::preset(FilterPreset::Aggressive);

        assert!(conservative.min_liquidity_sol > balanced.min_liquidity_sol);
        assert!(balanced.min_liquidity_sol > aggressive.min_liquidity_sol);
        assert!(conservative.max_risk_score < balanced.max_risk_score);
        assert!(balanced.max_risk_score < aggressive.max_risk_score);
    }

    #[test]
    fn test_sell_tax_cap() {
        let config = FilterEngine::preset(FilterPreset::Aggressive);
        let facts = TokenFacts {
            sell_tax_pct: Some(Decimal::from(30)),
            ..healthy_facts()
        };
        let result = FilterEngine::evaluate(&config, FilterPreset::Aggressive, &facts);
        assert!(result.violated_filters().contains(&"max_sell_tax"));
    }
}
