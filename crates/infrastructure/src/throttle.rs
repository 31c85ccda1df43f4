//! 限速传输流
//!
//! [`ThrottledStream`] 包装一个内部流，实现同样的 `AsyncRead` / `AsyncWrite` 能力。
//! 每次读写前比较“按限速应当耗费的时间”（已传输字节 / 速率）和实际经过的时间，
//! 超前时先等待差值再执行底层操作；操作完成后按实际传输的字节数累加计数。
//!
//! 等待是一个 tokio 定时器，丢弃流（例如请求被中止）会立即取消等待，不会再传输任何字节。

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep_until, Instant, Sleep};

/// 传输方向，仅用于日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Upload => f.write_str("upload"),
            TransferDirection::Download => f.write_str("download"),
        }
    }
}

/// 流关闭时的传输记录
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferSummary {
    pub total_bytes: u64,
    pub elapsed: Duration,
    pub observed_rate_kbps: f64,
    /// 0 表示不限速
    pub limit_kbps: u64,
}

/// 把 KB/s 配置值换算为字节/秒，小于等于 0 表示不限速，过大的值饱和到 `u64::MAX`
pub fn bytes_per_second(rate_kbps: i64) -> u64 {
    if rate_kbps <= 0 {
        0
    } else {
        (rate_kbps as u64).saturating_mul(1024)
    }
}

pub struct ThrottledStream<S> {
    inner: Option<S>,
    direction: TransferDirection,
    max_bytes_per_sec: u64,
    opened_at: Instant,
    transferred: u64,
    delay: Option<Pin<Box<Sleep>>>,
    summary: Option<TransferSummary>,
}

impl<S> ThrottledStream<S> {
    /// `rate_kbps <= 0` 时不做任何限速
    pub fn new(inner: S, rate_kbps: i64, direction: TransferDirection) -> Self {
        Self {
            inner: Some(inner),
            direction,
            max_bytes_per_sec: bytes_per_second(rate_kbps),
            opened_at: Instant::now(),
            transferred: 0,
            delay: None,
            summary: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// 已实际传输的字节数
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// 关闭流并释放内部流，重复调用返回同一份记录
    pub fn close(&mut self) -> TransferSummary {
        if let Some(summary) = self.summary {
            return summary;
        }
        self.inner = None;
        self.delay = None;

        let elapsed = self.opened_at.elapsed();
        let secs = elapsed.as_secs_f64();
        let observed_rate_kbps = if secs > 0.0 {
            self.transferred as f64 / 1024.0 / secs
        } else {
            0.0
        };
        let summary = TransferSummary {
            total_bytes: self.transferred,
            elapsed,
            observed_rate_kbps,
            limit_kbps: self.max_bytes_per_sec / 1024,
        };
        tracing::info!(
            direction = %self.direction,
            total_bytes = summary.total_bytes,
            elapsed_seconds = format_args!("{secs:.2}"),
            observed_rate_kbps = format_args!("{observed_rate_kbps:.2}"),
            limit_kbps = summary.limit_kbps,
            "传输完成"
        );
        self.summary = Some(summary);
        summary
    }

    /// 按已传输字节计算是否需要等待，需要时挂起直到节奏恢复
    fn poll_pace(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if self.max_bytes_per_sec == 0 {
            return Poll::Ready(());
        }
        if self.delay.is_none() {
            let expected =
                Duration::from_secs_f64(self.transferred as f64 / self.max_bytes_per_sec as f64);
            let deadline = self.opened_at + expected;
            if deadline > Instant::now() {
                self.delay = Some(Box::pin(sleep_until(deadline)));
            }
        }
        if let Some(delay) = self.delay.as_mut() {
            ready!(delay.as_mut().poll(cx));
            self.delay = None;
        }
        Poll::Ready(())
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "throttled stream is closed")
}

impl<S: AsyncRead + Unpin> AsyncRead for ThrottledStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.inner.is_none() {
            return Poll::Ready(Err(closed_error()));
        }
        ready!(this.poll_pace(cx));

        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Err(closed_error()));
        };
        let before = buf.filled().len();
        ready!(Pin::new(inner).poll_read(cx, buf))?;
        this.transferred += (buf.filled().len() - before) as u64;
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ThrottledStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.inner.is_none() {
            return Poll::Ready(Err(closed_error()));
        }
        ready!(this.poll_pace(cx));

        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Err(closed_error()));
        };
        let written = ready!(Pin::new(inner).poll_write(cx, buf))?;
        this.transferred += written as u64;
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_flush(cx),
            None => Poll::Ready(Err(closed_error())),
        }
    }

    /// 关闭底层写端后释放内部流；已关闭时直接返回
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        ready!(Pin::new(inner).poll_shutdown(cx))?;
        this.close();
        Poll::Ready(Ok(()))
    }
}

impl<S> Drop for ThrottledStream<S> {
    fn drop(&mut self) {
        if self.summary.is_none() {
            self.close();
        }
    }
}

impl<S> fmt::Debug for ThrottledStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottledStream")
            .field("direction", &self.direction)
            .field("max_bytes_per_sec", &self.max_bytes_per_sec)
            .field("transferred", &self.transferred)
            .field("open", &self.is_open())
            .finish()
    }
}
