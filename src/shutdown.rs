use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info};

/// 优雅关闭管理器
#[derive(Clone)]
pub struct ShutdownManager {
    /// 关闭信号发送器，触发关闭后清空
    shutdown_tx: Arc<Mutex<Option<broadcast::Sender<()>>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);

        Self {
            shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
        }
    }

    /// 订阅关闭信号
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        match &*self.shutdown_tx.lock().await {
            Some(tx) => tx.subscribe(),
            None => {
                // 已经关闭：返回一个立即触发的接收器
                let (tx, rx) = broadcast::channel(1);
                let _ = tx.send(());
                rx
            }
        }
    }

    /// 触发关闭，重复调用无副作用
    pub async fn shutdown(&self) {
        let Some(tx) = self.shutdown_tx.lock().await.take() else {
            debug!("关闭管理器已经触发过关闭");
            return;
        };

        debug!("发送关闭信号给 {} 个订阅者", tx.receiver_count());
        // 没有接收者时发送失败，忽略即可
        let _ = tx.send(());
        info!("关闭信号已发送");
    }

    #[cfg(test)]
    pub async fn is_shutdown(&self) -> bool {
        self.shutdown_tx.lock().await.is_none()
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 发出关闭信号后服务器任务的结束方式
#[derive(Debug)]
pub enum ShutdownOutcome<T> {
    Finished(T),
    Panicked(JoinError),
    /// 超时未结束，任务已被中止
    TimedOut,
}

/// 在限定时间内等待任务结束，超时后中止任务
pub async fn wait_for_task<T>(handle: &mut JoinHandle<T>, limit: Duration) -> ShutdownOutcome<T> {
    match tokio::time::timeout(limit, &mut *handle).await {
        Ok(Ok(value)) => ShutdownOutcome::Finished(value),
        Ok(Err(e)) => ShutdownOutcome::Panicked(e),
        Err(_) => {
            handle.abort();
            ShutdownOutcome::TimedOut
        }
    }
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_shutdown_manager_basic() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown().await);

        let mut rx = manager.subscribe().await;
        manager.shutdown().await;

        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_ok());
        assert!(manager.is_shutdown().await);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let manager = ShutdownManager::new();

        let mut rx1 = manager.subscribe().await;
        let mut rx2 = manager.subscribe().await;

        manager.shutdown().await;

        assert!(timeout(Duration::from_millis(100), rx1.recv()).await.is_ok());
        assert!(timeout(Duration::from_millis(100), rx2.recv()).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_fires_immediately() {
        let manager = ShutdownManager::new();
        manager.shutdown().await;
        // 重复关闭不应 panic
        manager.shutdown().await;

        let mut rx = manager.subscribe().await;
        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let manager = ShutdownManager::new();
        let cloned = manager.clone();
        let mut rx = manager.subscribe().await;

        cloned.shutdown().await;

        assert!(manager.is_shutdown().await);
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_task_returns_result() {
        let mut handle = tokio::spawn(async { 42 });

        let outcome = wait_for_task(&mut handle, Duration::from_secs(1)).await;
        assert!(matches!(outcome, ShutdownOutcome::Finished(42)));
    }

    #[tokio::test]
    async fn test_wait_for_task_aborts_stuck_task() {
        let mut handle = tokio::spawn(std::future::pending::<()>());

        let outcome = wait_for_task(&mut handle, Duration::from_millis(50)).await;
        assert!(matches!(outcome, ShutdownOutcome::TimedOut));

        let joined = timeout(Duration::from_secs(1), handle)
            .await
            .expect("中止后任务应当很快结束");
        assert!(joined.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_for_task_reports_panic() {
        let mut handle = tokio::spawn(async { panic!("render task panicked") });

        let outcome = wait_for_task(&mut handle, Duration::from_secs(1)).await;
        assert!(matches!(outcome, ShutdownOutcome::Panicked(e) if e.is_panic()));
    }
}
