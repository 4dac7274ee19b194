//! Small string helpers for task URLs and configured paths.

use std::sync::LazyLock;

use regex::Regex;

static HOST_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://([^/:?#\s]+:[0-9]+)").expect("valid regex")
});

static AUTHORITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*://)[^/?#]*").expect("valid regex")
});

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("valid regex")
});

/// Point `url` at the `host:port` of `target_url`.
///
/// `target_url` must look like `scheme://host:port`; without an explicit
/// port `url` is returned unchanged. The scheme, path and query of `url`
/// are kept.
pub fn replace_ip_and_port(target_url: &str, url: &str) -> String {
    let Some(host_port) = HOST_PORT
        .captures(target_url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
    else {
        return url.to_string();
    };
    AUTHORITY
        .replace(url, |c: &regex::Captures<'_>| format!("{}{host_port}", &c[1]))
        .into_owned()
}

/// Expand `$VAR` and `${VAR}` from the process environment. Unset
/// variables are left as written.
pub fn expand_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |c: &regex::Captures<'_>| {
            let name = c.get(1).or_else(|| c.get(2)).map_or("", |m| m.as_str());
            std::env::var(name).unwrap_or_else(|_| c[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: &str = "http://WEBARENA_HOST:PORT/rest/default/V1/orders";

    #[test]
    fn replaces_with_ipv4_target() {
        assert_eq!(
            replace_ip_and_port("http://10.0.0.5:7770", ORDERS),
            "http://10.0.0.5:7770/rest/default/V1/orders"
        );
    }

    #[test]
    fn replaces_with_hostname_target() {
        assert_eq!(
            replace_ip_and_port(
                "http://ec2-3-136-229-169.us-east-2.compute.amazonaws.com:9999",
                ORDERS
            ),
            "http://ec2-3-136-229-169.us-east-2.compute.amazonaws.com:9999/rest/default/V1/orders"
        );
    }

    #[test]
    fn target_without_port_leaves_url_alone() {
        assert_eq!(replace_ip_and_port("https://no-port-hostname", ORDERS), ORDERS);
    }

    #[test]
    fn url_without_path() {
        assert_eq!(
            replace_ip_and_port("http://127.0.0.1:8023/", "http://gitlab.local"),
            "http://127.0.0.1:8023"
        );
    }

    #[test]
    fn unset_variables_are_kept() {
        let out = expand_env_vars("$WEBGYM_SURELY_UNSET_VAR/train.jsonl");
        assert_eq!(out, "$WEBGYM_SURELY_UNSET_VAR/train.jsonl");
    }

    #[test]
    fn set_variables_expand() {
        let home = std::env::var("PATH").unwrap_or_default();
        assert_eq!(expand_env_vars("${PATH}:x"), format!("{home}:x"));
    }
}
