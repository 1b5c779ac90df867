use std::io;

use tokio::signal;

/// 等待终止信号，返回信号名称用于日志
#[cfg(target_family = "windows")]
pub async fn terminate() -> io::Result<&'static str> {
    signal::ctrl_c().await?;
    Ok("Ctrl-C")
}

/// ctrl + c 发送的是 SIGINT 信号，kill 默认发送的是 SIGTERM 信号，都需要处理
#[cfg(target_family = "unix")]
pub async fn terminate() -> io::Result<&'static str> {
    use tokio::select;

    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut int = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    select! {
        _ = term.recv() => Ok("SIGTERM"),
        _ = int.recv() => Ok("SIGINT"),
    }
}
