use std::time::Duration;

use bitcoin::Amount;

/// Display unit chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Denomination {
    Btc,
    #[default]
    MilliBtc,
    Bits,
}

impl Denomination {
    pub fn unit(self) -> bitcoin::Denomination {
        match self {
            Denomination::Btc => bitcoin::Denomination::Bitcoin,
            Denomination::MilliBtc => bitcoin::Denomination::MilliBitcoin,
            Denomination::Bits => bitcoin::Denomination::Bit,
        }
    }
}

/// Account settings as stored by the core.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Home fiat currency (ISO code).
    pub currency_code: String,
    pub denomination: Denomination,
    pub pin_login: bool,
    pub spend_require_pin: bool,
    /// Spends above this amount ask for the PIN.
    pub spend_require_pin_amount: Amount,
    pub daily_spend_limit: Option<Amount>,
    /// Seconds in background before the session expires. Zero expires it on
    /// any trip to the background.
    pub auto_logout_secs: u64,
}

impl Settings {
    /// Background time the session may exceed before it expires.
    pub fn auto_logout(&self) -> Duration {
        Duration::from_secs(self.auto_logout_secs)
    }

    /// Whether spending `amount` needs the PIN under these settings.
    pub fn requires_pin(&self, amount: Amount) -> bool {
        self.spend_require_pin && amount > self.spend_require_pin_amount
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            currency_code: "USD".to_string(),
            denomination: Denomination::default(),
            pin_login: true,
            spend_require_pin: true,
            spend_require_pin_amount: Amount::from_sat(5_000_000),
            daily_spend_limit: None,
            auto_logout_secs: 3_600,
        }
    }
}
