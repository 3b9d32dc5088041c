use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Credit {
    bucket: String,
    expires_at: DateTime<Utc>,
}

/// Single-use tokens handed out when an admitted call times out, letting the
/// same caller retry once without being charged again.
#[derive(Debug)]
pub struct RetryCredits {
    credits: DashMap<String, Credit>,
    ttl: Duration,
}

impl RetryCredits {
    pub fn new(ttl: Duration) -> Self {
        Self {
            credits: DashMap::new(),
            ttl,
        }
    }

    pub fn issue(&self, bucket: &str, now: DateTime<Utc>) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        let expires_at = now + chrono::Duration::milliseconds(self.ttl.as_millis() as i64);
        self.credits.insert(
            token.clone(),
            Credit {
                bucket: bucket.to_string(),
                expires_at,
            },
        );
        token
    }

    /// Whether `token` would currently redeem for `bucket`, without using it.
    pub fn is_valid(&self, token: &str, bucket: &str, now: DateTime<Utc>) -> bool {
        self.credits
            .get(token)
            .is_some_and(|credit| credit.bucket == bucket && credit.expires_at > now)
    }

    /// Consume `token` if it was issued to `bucket` and has not expired.
    pub fn redeem(&self, token: &str, bucket: &str, now: DateTime<Utc>) -> bool {
        self.credits
            .remove_if(token, |_, credit| {
                credit.bucket == bucket && credit.expires_at > now
            })
            .is_some()
    }

    pub fn prune(&self, now: DateTime<Utc>) {
        self.credits.retain(|_, credit| credit.expires_at > now);
    }

    pub fn outstanding(&self) -> usize {
        self.credits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_is_single_use() {
        let credits = RetryCredits::new(Duration::from_secs(600));
        let now = Utc::now();
        let token = credits.issue("ip:1.2.3.4", now);

        assert!(credits.redeem(&token, "ip:1.2.3.4", now));
        assert!(!credits.redeem(&token, "ip:1.2.3.4", now));
    }

    #[test]
    fn test_checking_a_credit_does_not_spend_it() {
        let credits = RetryCredits::new(Duration::from_secs(600));
        let now = Utc::now();
        let token = credits.issue("ip:1.2.3.4", now);

        assert!(credits.is_valid(&token, "ip:1.2.3.4", now));
        assert!(!credits.is_valid(&token, "ip:5.6.7.8", now));
        assert!(!credits.is_valid(&token, "ip:1.2.3.4", now + chrono::Duration::hours(1)));
        assert!(credits.redeem(&token, "ip:1.2.3.4", now));
        assert!(!credits.is_valid(&token, "ip:1.2.3.4", now));
    }

    #[test]
    fn test_credit_is_bound_to_bucket() {
        let credits = RetryCredits::new(Duration::from_secs(600));
        let now = Utc::now();
        let token = credits.issue("ip:1.2.3.4", now);

        assert!(!credits.redeem(&token, "ip:5.6.7.8", now));
        // Failed attempt from another caller does not burn the credit.
        assert!(credits.redeem(&token, "ip:1.2.3.4", now));
    }

    #[test]
    fn test_credit_expires() {
        let credits = RetryCredits::new(Duration::from_secs(60));
        let now = Utc::now();
        let token = credits.issue("k", now);
        let later = now + chrono::Duration::seconds(61);

        assert!(!credits.redeem(&token, "k", later));
        credits.prune(later);
        assert_eq!(credits.outstanding(), 0);
    }
}
