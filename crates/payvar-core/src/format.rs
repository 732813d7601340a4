use payvar_config::{DEFAULT_CURRENCY_SYMBOL, FormatConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountFormat {
    pub currency_symbol: String,
    pub amount_decimals: usize,
    pub percent_decimals: usize,
}

impl AmountFormat {
    pub fn from_config(config: &FormatConfig) -> Self {
        Self {
            currency_symbol: config.currency_symbol.clone(),
            amount_decimals: usize::from(config.amount_decimals),
            percent_decimals: usize::from(config.percent_decimals),
        }
    }

    /// `1234567.4` becomes `1,234,567` with zero decimals.
    pub fn amount(&self, value: f64) -> String {
        group_thousands(value, self.amount_decimals)
    }

    pub fn currency(&self, value: f64) -> String {
        format!("{}{}", self.currency_symbol, self.amount(value))
    }

    pub fn percent(&self, value: f64) -> String {
        let formatted = format!("{:.*}", self.percent_decimals, value);
        strip_negative_zero(formatted)
    }
}

impl Default for AmountFormat {
    fn default() -> Self {
        Self {
            currency_symbol: DEFAULT_CURRENCY_SYMBOL.to_owned(),
            amount_decimals: 0,
            percent_decimals: 1,
        }
    }
}

fn group_thousands(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value.abs());
    let (integer, fraction) = match formatted.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3 + 4);
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }

    let is_zero = grouped.chars().all(|ch| matches!(ch, '0' | ',' | '.'));
    if value.is_sign_negative() && !is_zero {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn strip_negative_zero(formatted: String) -> String {
    match formatted.strip_prefix('-') {
        Some(rest) if rest.chars().all(|ch| matches!(ch, '0' | '.')) => rest.to_owned(),
        _ => formatted,
    }
}
