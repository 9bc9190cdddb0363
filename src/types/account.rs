//! Account-related types for the card authorizer
//!
//! This module defines the Account, its multi-category Balance and the spending
//! Categories the balance is split into.

use super::error::PaymentError;
use super::transaction::{AccountId, CategoryDebit, CategoryId};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// One spending category of a balance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    /// Internal category identifier
    pub id: CategoryId,

    /// Category name (FOOD, MEAL, CASH, ...)
    pub name: String,

    /// Funds left in this category, never negative
    pub amount: Decimal,

    /// Merchant category codes eligible for this category
    pub mcc_codes: BTreeSet<String>,

    /// Order used for deterministic iteration; lower is tried first
    pub priority: u32,

    /// Whether this is the catch-all category covering unmatched debt
    pub fallback: bool,
}

impl Category {
    /// Whether this category accepts the given MCC
    pub fn matches(&self, mcc: &str) -> bool {
        self.mcc_codes.contains(mcc)
    }
}

/// Multi-category prepaid balance
///
/// Categories are kept ordered by priority. The total is never stored: it is
/// recomputed from the categories every time it is asked for.
///
/// # Invariants (checked by [`Balance::new`])
///
/// - priorities and category ids are unique
/// - amounts are non-negative
/// - at most one category is the fallback, and it carries no MCC codes
/// - an MCC code belongs to at most one category
///
/// A balance without any fallback can still be built; allocation reports it as a
/// configuration error once a transaction actually needs the fallback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Balance {
    categories: BTreeMap<u32, Category>,
}

impl Balance {
    /// Build a balance, validating the category invariants
    pub fn new(categories: Vec<Category>) -> Result<Self, PaymentError> {
        let mut by_priority = BTreeMap::new();
        let mut ids = BTreeSet::new();
        let mut mcc_owner: HashMap<&str, &str> = HashMap::new();
        let mut fallback: Option<&str> = None;

        for category in &categories {
            if category.amount < Decimal::ZERO {
                return Err(PaymentError::configuration(format!(
                    "category {} has negative amount {}",
                    category.name, category.amount
                )));
            }

            if !ids.insert(category.id) {
                return Err(PaymentError::configuration(format!(
                    "duplicate category id {}",
                    category.id
                )));
            }

            if category.fallback {
                if let Some(existing) = fallback {
                    return Err(PaymentError::configuration(format!(
                        "categories {} and {} are both marked as fallback",
                        existing, category.name
                    )));
                }
                if !category.mcc_codes.is_empty() {
                    return Err(PaymentError::configuration(format!(
                        "fallback category {} must not be matched by MCC",
                        category.name
                    )));
                }
                fallback = Some(&category.name);
            }

            for mcc in &category.mcc_codes {
                if let Some(owner) = mcc_owner.insert(mcc.as_str(), category.name.as_str()) {
                    return Err(PaymentError::configuration(format!(
                        "MCC {} is claimed by both {} and {}",
                        mcc, owner, category.name
                    )));
                }
            }
        }

        for category in categories {
            let priority = category.priority;
            if by_priority.insert(priority, category).is_some() {
                return Err(PaymentError::configuration(format!(
                    "duplicate category priority {}",
                    priority
                )));
            }
        }

        Ok(Self {
            categories: by_priority,
        })
    }

    /// Categories in priority order
    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    /// First category (in priority order) whose MCC set contains `mcc`
    pub fn get_by_mcc(&self, mcc: &str) -> Option<&Category> {
        self.categories.values().find(|category| category.matches(mcc))
    }

    /// The designated fallback category, if configured
    pub fn fallback(&self) -> Option<&Category> {
        self.categories.values().find(|category| category.fallback)
    }

    /// Category by internal id
    pub fn category(&self, id: CategoryId) -> Option<&Category> {
        self.categories.values().find(|category| category.id == id)
    }

    /// Sum of every category amount
    pub fn amount_total(&self) -> Decimal {
        self.categories.values().map(|category| category.amount).sum()
    }

    fn category_mut(&mut self, id: CategoryId) -> Option<&mut Category> {
        self.categories
            .values_mut()
            .find(|category| category.id == id)
    }
}

/// Prepaid account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Internal identifier
    pub id: AccountId,

    /// External identifier used by callers
    pub uid: Uuid,

    /// The single balance owned by this account
    pub balance: Balance,
}

impl Account {
    /// Create an account owning the given balance
    pub fn new(id: AccountId, uid: Uuid, balance: Balance) -> Self {
        Account { id, uid, balance }
    }

    /// Apply a set of allocator debits to the balance
    ///
    /// Every debit is checked before anything is mutated, so either the whole set is
    /// applied or the balance is left untouched.
    ///
    /// # Returns
    ///
    /// * `Ok(())` if all debits were applied
    /// * `Err(PaymentError::Configuration)` if a debit references an unknown category
    /// * `Err(PaymentError::InsufficientFunds)` if a debit exceeds its category amount
    pub fn apply_debits(&mut self, debits: &[CategoryDebit]) -> Result<(), PaymentError> {
        let mut pending: BTreeMap<CategoryId, Decimal> = BTreeMap::new();
        for debit in debits {
            *pending.entry(debit.category_id).or_default() += debit.amount;
        }

        for (category_id, amount) in &pending {
            let category = self.balance.category(*category_id).ok_or_else(|| {
                PaymentError::configuration(format!(
                    "account {} has no category {}",
                    self.uid, category_id
                ))
            })?;

            if category.amount < *amount {
                return Err(PaymentError::insufficient_funds(
                    self.uid,
                    category.amount,
                    *amount,
                ));
            }
        }

        for (category_id, amount) in pending {
            if let Some(category) = self.balance.category_mut(category_id) {
                category.amount -= amount;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn category(id: CategoryId, name: &str, amount: Decimal, mccs: &[&str], priority: u32) -> Category {
        Category {
            id,
            name: name.to_string(),
            amount,
            mcc_codes: mccs.iter().map(|m| m.to_string()).collect(),
            priority,
            fallback: false,
        }
    }

    fn fallback(id: CategoryId, amount: Decimal, priority: u32) -> Category {
        Category {
            fallback: true,
            ..category(id, "CASH", amount, &[], priority)
        }
    }

    fn default_balance() -> Balance {
        Balance::new(vec![
            fallback(3, dec!(115.33), 3),
            category(1, "FOOD", dec!(205.11), &["5411", "5412"], 1),
            category(2, "MEAL", dec!(110.22), &["5811", "5812"], 2),
        ])
        .unwrap()
    }

    #[test]
    fn test_categories_are_ordered_by_priority() {
        let balance = default_balance();

        let names: Vec<&str> = balance.categories().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["FOOD", "MEAL", "CASH"]);
    }

    #[test]
    fn test_amount_total_is_sum_of_categories() {
        assert_eq!(default_balance().amount_total(), dec!(430.66));
    }

    #[test]
    fn test_lookup_by_mcc_and_fallback() {
        let balance = default_balance();

        assert_eq!(balance.get_by_mcc("5812").map(|c| c.id), Some(2));
        assert!(balance.get_by_mcc("9999").is_none());
        assert_eq!(balance.fallback().map(|c| c.id), Some(3));
    }

    #[test]
    fn test_zero_amount_category_is_valid() {
        let balance = Balance::new(vec![category(1, "FOOD", dec!(0), &["5411"], 1)]);
        assert!(balance.is_ok());
    }

    #[test]
    fn test_missing_fallback_is_allowed_at_construction() {
        let balance = Balance::new(vec![category(1, "FOOD", dec!(10), &["5411"], 1)]).unwrap();
        assert!(balance.fallback().is_none());
    }

    #[test]
    fn test_rejects_two_fallbacks() {
        let result = Balance::new(vec![fallback(1, dec!(1), 1), fallback(2, dec!(1), 2)]);
        assert!(matches!(result, Err(PaymentError::Configuration { .. })));
    }

    #[test]
    fn test_rejects_fallback_with_mcc_codes() {
        let mut cash = fallback(1, dec!(1), 1);
        cash.mcc_codes.insert("5411".to_string());

        let result = Balance::new(vec![cash]);
        assert!(matches!(result, Err(PaymentError::Configuration { .. })));
    }

    #[test]
    fn test_rejects_mcc_shared_between_categories() {
        let result = Balance::new(vec![
            category(1, "FOOD", dec!(1), &["5411"], 1),
            category(2, "MEAL", dec!(1), &["5411"], 2),
        ]);
        assert!(matches!(result, Err(PaymentError::Configuration { .. })));
    }

    #[test]
    fn test_rejects_duplicate_priority() {
        let result = Balance::new(vec![
            category(1, "FOOD", dec!(1), &["5411"], 1),
            category(2, "MEAL", dec!(1), &["5811"], 1),
        ]);
        assert!(matches!(result, Err(PaymentError::Configuration { .. })));
    }

    #[test]
    fn test_rejects_negative_amount() {
        let result = Balance::new(vec![category(1, "FOOD", dec!(-0.01), &["5411"], 1)]);
        assert!(matches!(result, Err(PaymentError::Configuration { .. })));
    }

    #[test]
    fn test_apply_debits_updates_categories() {
        let mut account = Account::new(1, Uuid::nil(), default_balance());
        let debits = vec![CategoryDebit {
            category_id: 1,
            category: "FOOD".to_string(),
            priority: 1,
            amount: dec!(100.10),
        }];

        account.apply_debits(&debits).unwrap();

        assert_eq!(account.balance.category(1).unwrap().amount, dec!(105.01));
        assert_eq!(account.balance.amount_total(), dec!(330.56));
    }

    #[test]
    fn test_apply_debits_is_all_or_nothing() {
        let mut account = Account::new(1, Uuid::nil(), default_balance());
        let before = account.clone();
        let debits = vec![
            CategoryDebit {
                category_id: 1,
                category: "FOOD".to_string(),
                priority: 1,
                amount: dec!(10),
            },
            CategoryDebit {
                category_id: 3,
                category: "CASH".to_string(),
                priority: 3,
                amount: dec!(500),
            },
        ];

        let result = account.apply_debits(&debits);

        assert!(matches!(result, Err(PaymentError::InsufficientFunds { .. })));
        assert_eq!(account, before);
    }

    #[test]
    fn test_apply_debits_rejects_unknown_category() {
        let mut account = Account::new(1, Uuid::nil(), default_balance());
        let debits = vec![CategoryDebit {
            category_id: 42,
            category: "GHOST".to_string(),
            priority: 9,
            amount: dec!(1),
        }];

        assert!(matches!(
            account.apply_debits(&debits),
            Err(PaymentError::Configuration { .. })
        ));
    }
}
