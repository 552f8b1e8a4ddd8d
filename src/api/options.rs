use crate::replica::ReplicaOptions;
use std::convert::TryFrom;
use tokio::time::Duration;

/// Timing knobs of a member. Every unset option takes its default.
#[derive(Clone, Debug, Default)]
pub struct RaftOptions {
    pub leader_heartbeat_duration: Option<Duration>,
    pub follower_min_timeout: Option<Duration>,
    pub follower_max_timeout: Option<Duration>,
    pub leader_append_entries_timeout: Option<Duration>,
    /// How long a client session survives without keep-alives.
    pub session_timeout: Option<Duration>,
    /// How long a leader trusts a quorum's heartbeat acknowledgements for bounded linearizable
    /// reads. Defaults to `follower_min_timeout`.
    pub lease_duration: Option<Duration>,
    pub max_entries_per_append: Option<usize>,
    /// How long the leader waits for a client to acknowledge an event batch. Defaults to
    /// `leader_append_entries_timeout`.
    pub publish_timeout: Option<Duration>,
}

pub(super) struct RaftOptionsValidated {
    pub leader_heartbeat_duration: Duration,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
    pub leader_append_entries_timeout: Duration,
    pub session_timeout: Duration,
    pub lease_duration: Duration,
    pub max_entries_per_append: usize,
    pub publish_timeout: Duration,
}

impl RaftOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.leader_heartbeat_duration >= self.follower_min_timeout {
            return Err("Follower minimum timeout must be greater than leader's heartbeat");
        }
        if self.follower_min_timeout >= self.follower_max_timeout {
            return Err("Follower minimum timeout must be less than maximum timeout");
        }
        if self.leader_append_entries_timeout >= self.follower_min_timeout {
            return Err("Leader's AppendEntries RPC timeout must be less than the follower's heartbeat timeout");
        }
        if self.lease_duration > self.follower_min_timeout {
            return Err("Leader lease must not outlast the follower minimum timeout");
        }
        if self.session_timeout <= self.follower_max_timeout {
            return Err("Session timeout must be greater than the follower maximum timeout");
        }
        if self.max_entries_per_append == 0 {
            return Err("AppendEntries must carry at least 1 entry");
        }

        Ok(())
    }
}

impl TryFrom<RaftOptions> for RaftOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let follower_min_timeout = options.follower_min_timeout.unwrap_or(Duration::from_millis(500));
        let leader_append_entries_timeout = options
            .leader_append_entries_timeout
            .unwrap_or(Duration::from_millis(300));
        let values = RaftOptionsValidated {
            leader_heartbeat_duration: options.leader_heartbeat_duration.unwrap_or(Duration::from_millis(100)),
            follower_min_timeout,
            follower_max_timeout: options.follower_max_timeout.unwrap_or(Duration::from_millis(1500)),
            leader_append_entries_timeout,
            session_timeout: options.session_timeout.unwrap_or(Duration::from_secs(5)),
            lease_duration: options.lease_duration.unwrap_or(follower_min_timeout),
            max_entries_per_append: options.max_entries_per_append.unwrap_or(256),
            publish_timeout: options.publish_timeout.unwrap_or(leader_append_entries_timeout),
        };

        values.validate()?;
        Ok(values)
    }
}

impl From<&RaftOptionsValidated> for ReplicaOptions {
    fn from(options: &RaftOptionsValidated) -> Self {
        ReplicaOptions {
            leader_heartbeat_duration: options.leader_heartbeat_duration,
            follower_min_timeout: options.follower_min_timeout,
            follower_max_timeout: options.follower_max_timeout,
            append_entries_timeout: options.leader_append_entries_timeout,
            session_timeout: options.session_timeout,
            lease_duration: options.lease_duration,
            max_entries_per_append: options.max_entries_per_append,
            publish_timeout: options.publish_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = RaftOptionsValidated::try_from(RaftOptions::default()).unwrap();
        assert_eq!(options.lease_duration, options.follower_min_timeout);
        assert_eq!(options.publish_timeout, options.leader_append_entries_timeout);
        assert_eq!(options.max_entries_per_append, 256);
    }

    #[test]
    fn rejects_inconsistent_timeouts() {
        let cases = vec![
            RaftOptions {
                leader_heartbeat_duration: Some(Duration::from_millis(600)),
                ..Default::default()
            },
            RaftOptions {
                follower_max_timeout: Some(Duration::from_millis(400)),
                ..Default::default()
            },
            RaftOptions {
                lease_duration: Some(Duration::from_secs(1)),
                ..Default::default()
            },
            RaftOptions {
                session_timeout: Some(Duration::from_secs(1)),
                ..Default::default()
            },
            RaftOptions {
                max_entries_per_append: Some(0),
                ..Default::default()
            },
        ];

        for options in cases {
            assert!(RaftOptionsValidated::try_from(options.clone()).is_err(), "{:?}", options);
        }
    }
}
