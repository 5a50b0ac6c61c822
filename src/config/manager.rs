//! 配置管理器 - 负责处理不同环境下的配置覆盖
//!
//! 环境名来自 `SPARK_ENV`，对应 `<config 根目录>/environments/{env}.toml`。

use std::env;
use std::path::Path;

use anyhow::Result;
use toml::Value;

use super::load_toml_value;

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 SPARK_ENV 获取当前环境名称，
    /// 如果未设置则默认为 "development"
    pub fn get_environment() -> String {
        env::var("SPARK_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 读取当前环境的覆盖配置
    ///
    /// # 参数
    /// * `root` - 配置根目录
    ///
    /// # 返回
    /// 环境配置文件存在时返回其内容，否则返回 None
    pub fn environment_overlay(root: &Path) -> Result<Option<Value>> {
        let env_config_path = root
            .join("environments")
            .join(format!("{}.toml", Self::get_environment()));

        if !env_config_path.exists() {
            return Ok(None);
        }

        load_toml_value(&env_config_path).map(Some)
    }
}
