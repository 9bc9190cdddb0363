//! Category allocation
//!
//! Splits one payment across the categories of a balance: the category whose MCC
//! set matches the transaction is debited first, and whatever it cannot cover is
//! taken from the fallback category.
//!
//! # Rules
//!
//! 1. Matched category covers the whole amount: a single debit.
//! 2. Matched category is positive but short: it is drained to zero and the
//!    remainder goes to the fallback.
//! 3. No match: the whole amount goes to the fallback.
//! 4. Fallback short of the remainder: the allocation is abandoned entirely,
//!    including any debit already planned against the matched category.
//!
//! Allocation is pure. It never mutates the balance; the returned debits are
//! applied by the repository when the transaction is persisted.

use crate::types::{Balance, Category, CategoryDebit, PaymentError, PaymentTransaction};
use rust_decimal::Decimal;
use tracing::debug;

/// Compute the category debits for a transaction
///
/// # Arguments
///
/// * `balance` - The account balance, read only
/// * `transaction` - The transaction with its effective MCC
///
/// # Returns
///
/// * `Ok(Vec<CategoryDebit>)` - One debit per category touched, in the order taken
/// * `Err(PaymentError::InsufficientFunds)` - Matched and fallback together cannot
///   cover the amount
/// * `Err(PaymentError::Configuration)` - The fallback is needed but not configured,
///   or the matched category is itself the fallback
pub fn allocate(
    balance: &Balance,
    transaction: &PaymentTransaction,
) -> Result<Vec<CategoryDebit>, PaymentError> {
    let mut debits = Vec::with_capacity(2);
    let mut remaining = transaction.amount;
    let mut reachable = Decimal::ZERO;

    match balance.get_by_mcc(&transaction.mcc) {
        Some(matched) if matched.fallback => {
            return Err(PaymentError::configuration(format!(
                "category {} is both MCC-matched and fallback",
                matched.name
            )));
        }
        Some(matched) if matched.amount >= remaining => {
            debug!(category = %matched.name, "matched category covers the full amount");
            debits.push(debit(matched, remaining));
            remaining = Decimal::ZERO;
        }
        Some(matched) if matched.amount > Decimal::ZERO => {
            debug!(
                category = %matched.name,
                available = %matched.amount,
                "matched category is short, taking the remainder from fallback"
            );
            reachable = matched.amount;
            remaining -= matched.amount;
            debits.push(debit(matched, matched.amount));
        }
        Some(matched) => {
            debug!(category = %matched.name, "matched category is empty, using fallback");
        }
        None => {
            debug!(mcc = %transaction.mcc, "no category matches MCC, using fallback");
        }
    }

    if remaining > Decimal::ZERO {
        let fallback = balance.fallback().ok_or_else(|| {
            PaymentError::configuration(format!(
                "no fallback category configured for account {}",
                transaction.account_uid
            ))
        })?;

        if fallback.amount >= remaining {
            debug!(category = %fallback.name, "fallback covers the remainder");
            debits.push(debit(fallback, remaining));
            remaining = Decimal::ZERO;
        } else {
            debug!(category = %fallback.name, "fallback is short, abandoning allocation");
            reachable += fallback.amount;
            debits.clear();
            remaining = transaction.amount;
        }
    }

    if remaining > Decimal::ZERO || debits.is_empty() {
        return Err(PaymentError::insufficient_funds(
            transaction.account_uid,
            reachable,
            transaction.amount,
        ));
    }

    Ok(debits)
}

fn debit(category: &Category, amount: Decimal) -> CategoryDebit {
    CategoryDebit {
        category_id: category.id,
        category: category.name.clone(),
        priority: category.priority,
        amount,
    }
}
