//! Per-user balances
//!
//! An [`Account`] holds the spendable `balance` and the `freeze_balance`
//! committed to open tasks. Every setter is checked: a result below zero is
//! rejected and the account is left as it was.

use crate::{
    error::{BalanceField, EscrowError},
    models::{Amount, UserId},
    EscrowResult,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    owner: UserId,
    balance: Amount,
    freeze_balance: Amount,
}

impl Account {
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            balance: Decimal::ZERO,
            freeze_balance: Decimal::ZERO,
        }
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn freeze_balance(&self) -> Amount {
        self.freeze_balance
    }

    /// Funds owned in total, spendable plus frozen
    pub fn total(&self) -> Amount {
        self.balance + self.freeze_balance
    }

    /// Take `amount` from the spendable balance.
    ///
    /// # Errors
    ///
    /// [`EscrowError::InsufficientFunds`] when `amount` exceeds the balance.
    pub fn debit_balance(&mut self, amount: Amount) -> EscrowResult<()> {
        reject_negative(self.owner, amount, BalanceField::Balance)?;
        if amount > self.balance {
            return Err(EscrowError::insufficient_funds(amount, self.balance));
        }
        self.balance -= amount;
        Ok(())
    }

    pub fn credit_balance(&mut self, amount: Amount) -> EscrowResult<()> {
        self.balance = self.checked_credit(self.balance, amount, BalanceField::Balance)?;
        Ok(())
    }

    /// Take `amount` out of the frozen funds.
    ///
    /// # Errors
    ///
    /// [`EscrowError::NegativeBalance`] when less than `amount` is frozen.
    pub fn debit_frozen(&mut self, amount: Amount) -> EscrowResult<()> {
        reject_negative(self.owner, amount, BalanceField::FreezeBalance)?;
        if amount > self.freeze_balance {
            return Err(EscrowError::negative_balance(
                self.owner,
                BalanceField::FreezeBalance,
            ));
        }
        self.freeze_balance -= amount;
        Ok(())
    }

    pub fn credit_frozen(&mut self, amount: Amount) -> EscrowResult<()> {
        self.freeze_balance =
            self.checked_credit(self.freeze_balance, amount, BalanceField::FreezeBalance)?;
        Ok(())
    }

    fn checked_credit(
        &self,
        current: Amount,
        amount: Amount,
        field: BalanceField,
    ) -> EscrowResult<Amount> {
        reject_negative(self.owner, amount, field)?;
        current
            .checked_add(amount)
            .ok_or_else(|| EscrowError::negative_balance(self.owner, field))
    }
}

fn reject_negative(owner: UserId, amount: Amount, field: BalanceField) -> EscrowResult<()> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(EscrowError::negative_balance(owner, field));
    }
    Ok(())
}
