//! 配置校验模块
//!
//! 校验规则：
//! - 队列容量、过期时间、在途上限 > 0
//! - transformation id 唯一，transformer_id 非空
//! - 目的地规则引用的 load rule 必须存在
//! - 需要 filter 的操作符必须带 filter
//! - mapping 至少有 source 或 map_to

use std::collections::HashSet;

use contracts::{ContractError, SdkSettings};

/// 校验 SdkSettings 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(settings: &SdkSettings) -> Result<(), ContractError> {
    validate_core(settings)?;
    validate_transformations(settings)?;
    validate_load_rules(settings)?;
    validate_destination_rules(settings)?;
    validate_mappings(settings)?;
    Ok(())
}

/// 校验核心限制
fn validate_core(settings: &SdkSettings) -> Result<(), ContractError> {
    let core = &settings.core;
    if core.max_queue_size == Some(0) {
        return Err(ContractError::config_validation(
            "core.max_queue_size",
            "must be > 0 (omit for the default, null for unbounded)",
        ));
    }
    if core.expiration_secs == 0 {
        return Err(ContractError::config_validation(
            "core.expiration_secs",
            "must be > 0",
        ));
    }
    if core.max_in_flight_per_destination == 0 {
        return Err(ContractError::config_validation(
            "core.max_in_flight_per_destination",
            "must be > 0",
        ));
    }
    Ok(())
}

/// 校验 transformation id 唯一性
fn validate_transformations(settings: &SdkSettings) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for transformation in &settings.transformations {
        if transformation.id.is_empty() {
            return Err(ContractError::config_validation(
                "transformations[].id",
                "must not be empty",
            ));
        }
        if transformation.transformer_id.is_empty() {
            return Err(ContractError::config_validation(
                format!("transformations[id={}].transformer_id", transformation.id),
                "must not be empty",
            ));
        }
        if !seen.insert(&transformation.id) {
            return Err(ContractError::config_validation(
                format!("transformations[id={}]", transformation.id),
                "duplicate transformation id",
            ));
        }
    }
    Ok(())
}

/// 校验条件的 filter 是否齐全
fn validate_load_rules(settings: &SdkSettings) -> Result<(), ContractError> {
    for (rule_id, rule) in &settings.load_rules {
        for condition in rule.leaves() {
            if condition.operator.requires_filter() && condition.filter.is_none() {
                return Err(ContractError::config_validation(
                    format!("load_rules.{rule_id}"),
                    format!(
                        "operator '{}' on '{}' requires a filter",
                        condition.operator, condition.variable
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// 校验目的地规则引用
fn validate_destination_rules(settings: &SdkSettings) -> Result<(), ContractError> {
    for (destination_id, destination) in &settings.destinations {
        let Some(rules) = &destination.rules else {
            continue;
        };
        if let Some(missing) = rules
            .leaves()
            .into_iter()
            .find(|id| !settings.load_rules.contains_key(*id))
        {
            return Err(ContractError::config_validation(
                format!("destinations.{destination_id}.rules"),
                format!("references undefined load rule '{missing}'"),
            ));
        }
    }
    Ok(())
}

/// 校验 mapping 来源
fn validate_mappings(settings: &SdkSettings) -> Result<(), ContractError> {
    for (destination_id, destination) in &settings.destinations {
        for mapping in destination.mappings.iter().flatten() {
            if mapping.source.is_none() && mapping.map_to.is_none() {
                return Err(ContractError::config_validation(
                    format!("destinations.{destination_id}.mappings[{}]", mapping.destination),
                    "needs a source or a map_to value",
                ));
            }
        }
    }
    Ok(())
}
