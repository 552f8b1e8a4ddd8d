use std::convert::TryFrom;
use tokio::time::Duration;

/// Client-side timing. Every unset option takes its default.
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    /// How long a single call keeps retrying against the cluster before giving up.
    pub request_timeout: Option<Duration>,
    /// First pause between retries. Doubles on every retry, up to `max_retry_backoff`.
    pub retry_backoff: Option<Duration>,
    pub max_retry_backoff: Option<Duration>,
    /// Defaults to half the session timeout the cluster hands out.
    pub keep_alive_interval: Option<Duration>,
}

#[derive(Clone, Debug)]
pub(crate) struct ClientOptionsValidated {
    pub(crate) request_timeout: Duration,
    pub(crate) retry_backoff: Duration,
    pub(crate) max_retry_backoff: Duration,
    pub(crate) keep_alive_interval: Option<Duration>,
}

impl ClientOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.retry_backoff.as_nanos() == 0 {
            return Err("Retry backoff must be positive");
        }
        if self.retry_backoff > self.max_retry_backoff {
            return Err("Retry backoff must not exceed the maximum retry backoff");
        }
        if self.request_timeout <= self.retry_backoff {
            return Err("Request timeout must be greater than the retry backoff");
        }
        if let Some(interval) = self.keep_alive_interval {
            if interval.as_nanos() == 0 {
                return Err("Keep-alive interval must be positive");
            }
        }

        Ok(())
    }
}

impl TryFrom<ClientOptions> for ClientOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ClientOptions) -> Result<Self, Self::Error> {
        let values = ClientOptionsValidated {
            request_timeout: options.request_timeout.unwrap_or(Duration::from_secs(10)),
            retry_backoff: options.retry_backoff.unwrap_or(Duration::from_millis(50)),
            max_retry_backoff: options.max_retry_backoff.unwrap_or(Duration::from_secs(1)),
            keep_alive_interval: options.keep_alive_interval,
        };

        values.validate()?;
        Ok(values)
    }
}

impl Default for ClientOptionsValidated {
    fn default() -> Self {
        ClientOptionsValidated {
            request_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(50),
            max_retry_backoff: Duration::from_secs(1),
            keep_alive_interval: None,
        }
    }
}
