use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::ConnectInfo,
    http::{Extensions, HeaderMap},
};
use domain::ClientIp;

/// 解析请求的客户端地址。
///
/// 默认使用对端地址。只有对端在 `trusted_proxies` 中时才读取转发头：
/// `X-Forwarded-For` 从右往左跳过受信代理，取第一个不受信的地址；
/// 其次是 `X-Real-IP`。转发头无法解析时回退到对端地址。
pub fn client_ip(
    headers: &HeaderMap,
    extensions: &Extensions,
    trusted_proxies: &[IpAddr],
) -> ClientIp {
    let Some(peer) = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
    else {
        return ClientIp::unknown();
    };

    if !trusted_proxies.contains(&peer) {
        return ClientIp::from(peer);
    }

    forwarded_client(headers, trusted_proxies)
        .or_else(|| header_ip(headers, "x-real-ip"))
        .map(ClientIp::from)
        .unwrap_or_else(|| ClientIp::from(peer))
}

fn forwarded_client(headers: &HeaderMap, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
    let chain = headers.get("x-forwarded-for")?.to_str().ok()?;
    let mut client = None;
    for hop in chain.rsplit(',') {
        let ip = hop.trim().parse::<IpAddr>().ok()?;
        client = Some(ip);
        if !trusted_proxies.contains(&ip) {
            break;
        }
    }
    client
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
