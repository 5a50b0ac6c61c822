//! # Prometheus 指标收集模块
//!
//! 为会话网关、路由服务、存储服务提供统一的指标定义。

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 会话网关指标
pub struct GatewayMetrics {
    /// 当前 TCP 连接数
    pub connections_active: IntGauge,
    /// 已认证客户端数
    pub clients_authenticated: IntGauge,
    /// 客户端上行消息数
    pub messages_in_total: IntCounter,
    /// 下发给客户端的消息数
    pub messages_out_total: IntCounter,
    /// 存储 RPC 耗时（秒）
    pub storage_rpc_duration_seconds: Histogram,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        let connections_active = IntGauge::new(
            "gateway_connections_active",
            "Number of open client connections",
        )
        .expect("Failed to create gateway_connections_active metric");

        let clients_authenticated = IntGauge::new(
            "gateway_clients_authenticated",
            "Number of authenticated client sessions",
        )
        .expect("Failed to create gateway_clients_authenticated metric");

        let messages_in_total = IntCounter::new(
            "gateway_messages_in_total",
            "Total number of messages received from clients",
        )
        .expect("Failed to create gateway_messages_in_total metric");

        let messages_out_total = IntCounter::new(
            "gateway_messages_out_total",
            "Total number of messages written to clients",
        )
        .expect("Failed to create gateway_messages_out_total metric");

        let storage_rpc_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "gateway_storage_rpc_duration_seconds",
                "Storage RPC round trip duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )
        .expect("Failed to create gateway_storage_rpc_duration_seconds metric");

        // 注册指标，忽略重复注册错误（测试中可能会重复创建）
        let _ = REGISTRY.register(Box::new(connections_active.clone()));
        let _ = REGISTRY.register(Box::new(clients_authenticated.clone()));
        let _ = REGISTRY.register(Box::new(messages_in_total.clone()));
        let _ = REGISTRY.register(Box::new(messages_out_total.clone()));
        let _ = REGISTRY.register(Box::new(storage_rpc_duration_seconds.clone()));

        Self {
            connections_active,
            clients_authenticated,
            messages_in_total,
            messages_out_total,
            storage_rpc_duration_seconds,
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 路由服务指标
pub struct RouteMetrics {
    /// 已注册的服务器链接数
    pub links_active: IntGauge,
    /// 转发次数（按命令）
    pub publish_total: IntCounterVec,
    /// 无订阅者而丢弃的发布次数
    pub publish_dropped_total: IntCounter,
}

impl RouteMetrics {
    pub fn new() -> Self {
        let links_active = IntGauge::new("route_links_active", "Number of registered server links")
            .expect("Failed to create route_links_active metric");

        let publish_total = IntCounterVec::new(
            Opts::new("route_publish_total", "Total number of forwarded publishes"),
            &["cmd"],
        )
        .expect("Failed to create route_publish_total metric");

        let publish_dropped_total = IntCounter::new(
            "route_publish_dropped_total",
            "Total number of publishes without any subscriber",
        )
        .expect("Failed to create route_publish_dropped_total metric");

        let _ = REGISTRY.register(Box::new(links_active.clone()));
        let _ = REGISTRY.register(Box::new(publish_total.clone()));
        let _ = REGISTRY.register(Box::new(publish_dropped_total.clone()));

        Self {
            links_active,
            publish_total,
            publish_dropped_total,
        }
    }
}

impl Default for RouteMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 存储服务指标
pub struct StorageMetrics {
    /// 追加到日志的消息数（按 peer / group）
    pub messages_appended_total: IntCounterVec,
    /// 追加耗时（秒）
    pub append_duration_seconds: Histogram,
    /// 离线加载返回的消息数
    pub offline_loaded_total: IntCounter,
    /// 写入推送队列的次数
    pub push_enqueued_total: IntCounter,
}

impl StorageMetrics {
    pub fn new() -> Self {
        let messages_appended_total = IntCounterVec::new(
            Opts::new(
                "storage_messages_appended_total",
                "Total number of messages appended to the log",
            ),
            &["kind"],
        )
        .expect("Failed to create storage_messages_appended_total metric");

        let append_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "storage_append_duration_seconds",
                "Message log append duration in seconds",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]),
        )
        .expect("Failed to create storage_append_duration_seconds metric");

        let offline_loaded_total = IntCounter::new(
            "storage_offline_loaded_total",
            "Total number of offline messages returned",
        )
        .expect("Failed to create storage_offline_loaded_total metric");

        let push_enqueued_total = IntCounter::new(
            "storage_push_enqueued_total",
            "Total number of push notifications enqueued",
        )
        .expect("Failed to create storage_push_enqueued_total metric");

        let _ = REGISTRY.register(Box::new(messages_appended_total.clone()));
        let _ = REGISTRY.register(Box::new(append_duration_seconds.clone()));
        let _ = REGISTRY.register(Box::new(offline_loaded_total.clone()));
        let _ = REGISTRY.register(Box::new(push_enqueued_total.clone()));

        Self {
            messages_appended_total,
            append_duration_seconds,
            offline_loaded_total,
            push_enqueued_total,
        }
    }
}

impl Default for StorageMetrics {
    fn default() -> Self {
        Self::new()
    }
}
