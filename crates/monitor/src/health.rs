//! Active health probing and composite scoring.

use crate::types::{HealthCheckResult, HealthChecks};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;
use vigil_cache::CacheInstance;

/// Configuration for health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Bounded per-instance result history
    pub max_history: usize,
    /// Round-trip time above this starts deducting from the score (ms)
    pub response_time_budget_ms: f64,
    /// Utilization above this deducts from the score
    pub memory_utilization_limit: f64,
    /// Hit rate below this deducts from the score
    pub hit_rate_floor: f64,
    /// Error rate above this deducts from the score
    pub error_rate_ceiling: f64,
    /// Scores at or above this count as healthy
    pub healthy_score: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_history: 100,
            response_time_budget_ms: 100.0,
            memory_utilization_limit: 0.9,
            hit_rate_floor: 0.7,
            error_rate_ceiling: 0.05,
            healthy_score: 70.0,
        }
    }
}

/// Runs a synthetic write→read→delete probe against a cache instance and
/// derives a 0–100 score from connectivity, latency, utilization, hit rate
/// and error rate. Never raises: any probe failure produces a zero-score
/// result with the failure recorded as an issue.
#[derive(Debug)]
pub struct HealthChecker {
    config: RwLock<HealthConfig>,
    history: RwLock<HashMap<String, VecDeque<HealthCheckResult>>>,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config: RwLock::new(config),
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Probe one instance and append the result to its history
    pub async fn perform_health_check(
        &self,
        instance: &str,
        cache: &dyn CacheInstance,
    ) -> HealthCheckResult {
        let config = self.config.read().clone();
        let probe_key = format!("__health_probe_{}", Uuid::new_v4());
        let probe_value = json!({ "probe": probe_key });
        let started = Instant::now();

        let mut issues = Vec::new();
        let mut score = 100.0f64;

        // Write -> read -> delete round trip; a failed step is a
        // connectivity failure and zeroes the score.
        if let Err(err) = cache.set(&probe_key, probe_value.clone(), None).await {
            return self.failure_result(instance, started, format!("probe write failed: {err}"));
        }
        let read_back = cache.get(&probe_key).await;
        if let Err(err) = cache.delete(&probe_key).await {
            return self.failure_result(instance, started, format!("probe delete failed: {err}"));
        }
        let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        if read_back.as_ref() != Some(&probe_value) {
            score -= 50.0;
            issues.push("probe read did not return the written value".to_string());
        }

        if response_time_ms > config.response_time_budget_ms {
            let over = response_time_ms - config.response_time_budget_ms;
            let deduction = (30.0 * over / config.response_time_budget_ms).min(30.0);
            score -= deduction;
            issues.push(format!(
                "slow probe round trip: {response_time_ms:.1}ms"
            ));
        }

        let (memory_usage, hit_rate, error_rate) = match cache.stats().await {
            Ok(stats) => {
                let memory_usage = stats.utilization();
                let hit_rate = stats.hit_rate();
                let error_rate = stats.error_rate();

                if memory_usage > config.memory_utilization_limit {
                    score -= 20.0;
                    issues.push(format!(
                        "memory utilization at {:.1}%",
                        memory_usage * 100.0
                    ));
                }
                if hit_rate < config.hit_rate_floor {
                    score -= 15.0;
                    issues.push(format!("hit rate at {:.1}%", hit_rate * 100.0));
                }
                if error_rate > config.error_rate_ceiling {
                    score -= 25.0;
                    issues.push(format!("error rate at {:.1}%", error_rate * 100.0));
                }
                (memory_usage, hit_rate, error_rate)
            }
            Err(err) => {
                issues.push(format!("stats unavailable: {err}"));
                (0.0, 0.0, 0.0)
            }
        };

        let score = score.clamp(0.0, 100.0);
        let result = HealthCheckResult {
            instance: instance.to_string(),
            timestamp: Utc::now(),
            is_healthy: score >= config.healthy_score,
            checks: HealthChecks {
                connectivity: true,
                response_time_ms,
                memory_usage,
                hit_rate,
                error_rate,
            },
            issues,
            score,
        };
        self.push_history(result.clone());
        result
    }

    /// Latest result for an instance
    pub fn latest(&self, instance: &str) -> Option<HealthCheckResult> {
        self.history
            .read()
            .get(instance)
            .and_then(|results| results.back().cloned())
    }

    /// Full bounded history for an instance, oldest first
    pub fn history(&self, instance: &str) -> Vec<HealthCheckResult> {
        self.history
            .read()
            .get(instance)
            .map(|results| results.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Average of the latest scores across instances; an instance with no
    /// history counts as the worst case.
    pub fn aggregate_score(&self, instances: &[String]) -> f64 {
        if instances.is_empty() {
            return 0.0;
        }
        let history = self.history.read();
        let total: f64 = instances
            .iter()
            .map(|name| {
                history
                    .get(name)
                    .and_then(|results| results.back())
                    .map_or(0.0, |result| result.score)
            })
            .sum();
        total / instances.len() as f64
    }

    fn failure_result(
        &self,
        instance: &str,
        started: Instant,
        issue: String,
    ) -> HealthCheckResult {
        warn!(instance, %issue, "health probe failed");
        let result = HealthCheckResult {
            instance: instance.to_string(),
            timestamp: Utc::now(),
            is_healthy: false,
            checks: HealthChecks {
                connectivity: false,
                response_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                memory_usage: 0.0,
                hit_rate: 0.0,
                error_rate: 0.0,
            },
            issues: vec![issue],
            score: 0.0,
        };
        self.push_history(result.clone());
        result
    }

    fn push_history(&self, result: HealthCheckResult) {
        let max_history = self.config.read().max_history;
        let mut history = self.history.write();
        let results = history.entry(result.instance.clone()).or_default();
        results.push_back(result);
        while results.len() > max_history {
            results.pop_front();
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
