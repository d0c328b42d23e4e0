//! Fee, cashback and referral split for a confirmed payment.

use rust_decimal::{Decimal, RoundingStrategy};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("{0} percentage must not be negative, got {1}")]
    Negative(&'static str, Decimal),
    #[error("platform fee, cashback and referral percentages add up to {0}, above 100")]
    ExceedsPayment(Decimal),
}

/// Percentages applied to the gross amount of every settled payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardPolicy {
    platform_fee_percent: Decimal,
    cashback_percent: Decimal,
    referral_percent: Decimal,
}

/// The amounts derived from one payment. `referral_reward` is `None` when the
/// purchaser has no referrer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split {
    pub platform_fee: Decimal,
    pub cashback: Decimal,
    pub referral_reward: Option<Decimal>,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            platform_fee_percent: Decimal::TEN,
            cashback_percent: Decimal::from(5),
            referral_percent: Decimal::ONE,
        }
    }
}

impl RewardPolicy {
    pub fn new(
        platform_fee_percent: Decimal,
        cashback_percent: Decimal,
        referral_percent: Decimal,
    ) -> Result<Self, PolicyError> {
        for (name, value) in [
            ("platform fee", platform_fee_percent),
            ("cashback", cashback_percent),
            ("referral", referral_percent),
        ] {
            if value < Decimal::ZERO {
                return Err(PolicyError::Negative(name, value));
            }
        }

        let total = platform_fee_percent + cashback_percent + referral_percent;
        if total > Decimal::ONE_HUNDRED {
            return Err(PolicyError::ExceedsPayment(total));
        }

        Ok(Self {
            platform_fee_percent,
            cashback_percent,
            referral_percent,
        })
    }

    /// `None` if the amount is too large to take a percentage of.
    pub fn split(&self, amount: Decimal, has_referrer: bool) -> Option<Split> {
        let referral_reward = if has_referrer {
            Some(percent_of(amount, self.referral_percent)?)
        } else {
            None
        };

        Some(Split {
            platform_fee: percent_of(amount, self.platform_fee_percent)?,
            cashback: percent_of(amount, self.cashback_percent)?,
            referral_reward,
        })
    }
}

fn percent_of(amount: Decimal, percent: Decimal) -> Option<Decimal> {
    amount
        .checked_mul(percent)?
        .checked_div(Decimal::ONE_HUNDRED)
        .map(|value| value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn money(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    #[rstest]
    #[case::hundred_dollars("100.00", "10.00", "5.00", "1.00")]
    #[case::fifty_dollars("50.00", "5.00", "2.50", "0.50")]
    #[case::one_cent("0.01", "0.00", "0.00", "0.00")]
    #[case::rounds_half_up("0.30", "0.03", "0.02", "0.00")]
    #[case::odd_cents("19.99", "2.00", "1.00", "0.20")]
    fn splits_with_default_policy(
        #[case] amount: &str,
        #[case] fee: &str,
        #[case] cashback: &str,
        #[case] referral: &str,
    ) {
        let split = RewardPolicy::default().split(money(amount), true).unwrap();

        assert_eq!(split.platform_fee, money(fee));
        assert_eq!(split.cashback, money(cashback));
        assert_eq!(split.referral_reward, Some(money(referral)));
    }

    #[test]
    fn no_referral_reward_without_referrer() {
        let split = RewardPolicy::default().split(money("100.00"), false).unwrap();

        assert_eq!(split.cashback, money("5.00"));
        assert_eq!(split.referral_reward, None);
    }

    #[test]
    fn refuses_amounts_that_overflow() {
        assert_eq!(RewardPolicy::default().split(Decimal::MAX, true), None);
        assert_eq!(RewardPolicy::default().split(Decimal::MAX, false), None);
    }

    #[test]
    fn rejects_negative_percentage() {
        let result = RewardPolicy::new(Decimal::TEN, Decimal::NEGATIVE_ONE, Decimal::ONE);

        assert_eq!(
            result,
            Err(PolicyError::Negative("cashback", Decimal::NEGATIVE_ONE))
        );
    }

    #[test]
    fn rejects_percentages_above_whole_payment() {
        let result = RewardPolicy::new(Decimal::from(60), Decimal::from(40), Decimal::ONE);

        assert_eq!(result, Err(PolicyError::ExceedsPayment(Decimal::from(101))));
    }
}
