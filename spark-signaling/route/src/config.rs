use anyhow::{Result, anyhow};
use spark_im_core::config::SparkAppConfig;

#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    /// VOIP 推送队列 Redis 地址，缺省时不推送
    pub push_redis_url: Option<String>,
}

impl RouteConfig {
    pub fn from_app_config(app: &SparkAppConfig) -> Result<Self> {
        let service = app.route_service();
        let push_redis_url = match service.push_redis.as_deref() {
            Some(name) => Some(
                app.redis_profile(name)
                    .map(|profile| profile.url.clone())
                    .ok_or_else(|| {
                        anyhow!("services.route.push_redis references unknown redis profile '{name}'")
                    })?,
            ),
            None => None,
        };
        Ok(Self { push_redis_url })
    }
}
