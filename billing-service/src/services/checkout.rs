//! Checkout totals: subtotal, discount resolution, tax and final amount.
//!
//! Pure calculation with no I/O. The caller resolves the customer's
//! membership discount and the acting role beforehand.

use rust_decimal::prelude::*;

use crate::config::{CheckoutSettings, DiscountCeilings, LoyaltySettings};
use crate::models::{BillItem, DiscountType, Role};
use crate::services::error::BillingError;
use crate::services::money::{parse_decimal, round_money, to_decimal};

/// Manual discount kinds accepted from a checkout request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualDiscountKind {
    Fix,
    Percentage,
}

/// A non-zero manual discount as requested. The amount stays raw until the
/// role has been checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualDiscount {
    pub kind: ManualDiscountKind,
    pub amount: f64,
}

impl ManualDiscount {
    /// Validate the raw `discount_amount` / `discount_type` pair.
    ///
    /// A missing type defaults to `fix`. A zero or absent amount yields `None`.
    pub fn parse(amount: Option<f64>, kind: Option<&str>) -> Result<Option<Self>, BillingError> {
        let kind = match kind.map(|k| k.trim().to_lowercase()) {
            None => ManualDiscountKind::Fix,
            Some(k) if k.is_empty() || k == "fix" => ManualDiscountKind::Fix,
            Some(k) if k == "percentage" => ManualDiscountKind::Percentage,
            Some(k) => {
                return Err(BillingError::Validation(format!(
                    "Invalid discount_type '{}': expected 'fix' or 'percentage'",
                    k
                )))
            }
        };

        let Some(amount) = amount else {
            return Ok(None);
        };
        if !amount.is_finite() || amount < 0.0 {
            return Err(BillingError::Validation(
                "discount_amount must be a non-negative number".to_string(),
            ));
        }

        if kind == ManualDiscountKind::Percentage && amount > 100.0 {
            return Err(BillingError::Validation(
                "Percentage discount cannot exceed 100".to_string(),
            ));
        }
        if amount == 0.0 {
            return Ok(None);
        }

        Ok(Some(Self { kind, amount }))
    }

    fn discount_type(&self) -> DiscountType {
        match self.kind {
            ManualDiscountKind::Fix => DiscountType::Fix,
            ManualDiscountKind::Percentage => DiscountType::Percentage,
        }
    }
}

/// Highest tax rate, in percent, a checkout accepts.
pub const MAX_TAX_RATE: Decimal = Decimal::ONE_HUNDRED;

/// Everything needed to total a bill.
#[derive(Debug, Clone)]
pub struct CheckoutInput<'a> {
    pub items: &'a [BillItem],
    pub role: Role,
    pub manual_discount: Option<ManualDiscount>,
    /// Discount percent from the customer's active membership, if any.
    pub membership_discount_percent: Option<Decimal>,
    pub tax_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutTotals {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub discount_type: Option<DiscountType>,
    pub amount_after_discount: Decimal,
    pub tax_amount: Decimal,
    pub final_amount: Decimal,
}

/// Reject any discount request from a role whose ceiling is zero.
pub fn ensure_can_discount(role: Role, ceilings: &DiscountCeilings) -> Result<(), BillingError> {
    match ceilings.ceiling(role) {
        Some(ceiling) if ceiling <= Decimal::ZERO => Err(BillingError::Forbidden(
            "Only owners can apply discounts".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Reject a non-zero manual discount the role is not allowed to give.
///
/// `base` is the amount the discount is taken from.
pub fn ensure_discount_allowed(
    role: Role,
    discount: Decimal,
    base: Decimal,
    ceilings: &DiscountCeilings,
) -> Result<(), BillingError> {
    if discount <= Decimal::ZERO {
        return Ok(());
    }
    let Some(ceiling) = ceilings.ceiling(role) else {
        return Ok(());
    };
    ensure_can_discount(role, ceilings)?;

    let percent = discount
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|scaled| scaled.checked_div(base))
        .unwrap_or(Decimal::MAX);
    if percent > ceiling {
        return Err(BillingError::Forbidden(format!(
            "Discount exceeds the {}% limit for role {}",
            ceiling.normalize(),
            role
        )));
    }
    Ok(())
}

/// Compute the bill totals.
///
/// An active membership discount always wins and bypasses the role check;
/// otherwise the manual discount applies subject to the role's ceiling.
pub fn calculate(
    input: &CheckoutInput<'_>,
    settings: &CheckoutSettings,
) -> Result<CheckoutTotals, BillingError> {
    if input.items.is_empty() {
        return Err(BillingError::Validation(
            "Cannot checkout a bill with no items".to_string(),
        ));
    }
    if input.tax_rate.is_sign_negative() || input.tax_rate > MAX_TAX_RATE {
        return Err(BillingError::Validation(format!(
            "tax_rate must be between 0 and {}",
            MAX_TAX_RATE
        )));
    }

    let dp = settings.money_precision;
    let subtotal = round_money(
        input.items.iter().map(|item| to_decimal(item.total)).sum(),
        dp,
    );

    let membership = input
        .membership_discount_percent
        .filter(|pct| *pct > Decimal::ZERO);

    let (discount_amount, discount_type) = if let Some(pct) = membership {
        (
            round_money(subtotal * pct / Decimal::ONE_HUNDRED, dp),
            Some(DiscountType::Membership),
        )
    } else if let Some(manual) = input.manual_discount {
        // Any non-zero request needs discount rights, however it converts
        ensure_can_discount(input.role, &settings.discount_ceilings)?;
        let value = parse_decimal(manual.amount, "discount_amount")?;
        let requested = match manual.kind {
            ManualDiscountKind::Fix => value,
            ManualDiscountKind::Percentage => subtotal * value / Decimal::ONE_HUNDRED,
        };
        ensure_discount_allowed(input.role, requested, subtotal, &settings.discount_ceilings)?;
        (round_money(requested, dp), Some(manual.discount_type()))
    } else {
        (Decimal::ZERO, None)
    };

    let amount_after_discount = (subtotal - discount_amount).max(Decimal::ZERO);
    let tax_amount = round_money(amount_after_discount * input.tax_rate / Decimal::ONE_HUNDRED, dp);
    let final_amount = amount_after_discount + tax_amount;

    Ok(CheckoutTotals {
        subtotal,
        discount_amount,
        discount_type,
        amount_after_discount,
        tax_amount,
        final_amount,
    })
}

/// Points earned for a paid amount; zero when the program is off.
pub fn loyalty_points(final_amount: Decimal, settings: &LoyaltySettings) -> i64 {
    if !settings.enabled || settings.amount_per_point <= Decimal::ZERO {
        return 0;
    }
    (final_amount / settings.amount_per_point)
        .floor()
        .to_i64()
        .unwrap_or(0)
        .max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemType;
    use rust_decimal_macros::dec;

    fn items(totals: &[f64]) -> Vec<BillItem> {
        totals
            .iter()
            .enumerate()
            .map(|(i, total)| BillItem {
                item_type: ItemType::Service,
                ref_id: format!("svc-{}", i),
                name: format!("Service {}", i),
                unit_price: *total,
                quantity: 1,
                discount: 0.0,
                total: *total,
                staff_id: None,
            })
            .collect()
    }

    fn input(items: &[BillItem], role: Role) -> CheckoutInput<'_> {
        CheckoutInput {
            items,
            role,
            manual_discount: None,
            membership_discount_percent: None,
            tax_rate: Decimal::ZERO,
        }
    }

    fn fix(amount: f64) -> Option<ManualDiscount> {
        Some(ManualDiscount {
            kind: ManualDiscountKind::Fix,
            amount,
        })
    }

    #[test]
    fn owner_fixed_discount_with_tax() {
        let lines = items(&[600.0, 400.0]);
        let mut input = input(&lines, Role::Owner);
        input.manual_discount = fix(100.0);
        input.tax_rate = dec!(18);

        let totals = calculate(&input, &CheckoutSettings::default()).unwrap();

        assert_eq!(totals.subtotal, dec!(1000));
        assert_eq!(totals.discount_amount, dec!(100));
        assert_eq!(totals.discount_type, Some(DiscountType::Fix));
        assert_eq!(totals.amount_after_discount, dec!(900));
        assert_eq!(totals.tax_amount, dec!(162));
        assert_eq!(totals.final_amount, dec!(1062));
    }

    #[test]
    fn membership_discount_overrides_manual_and_skips_role_check() {
        let lines = items(&[1000.0]);
        let mut input = input(&lines, Role::Staff);
        input.manual_discount = fix(500.0);
        input.membership_discount_percent = Some(dec!(20));

        let totals = calculate(&input, &CheckoutSettings::default()).unwrap();

        assert_eq!(totals.discount_amount, dec!(200));
        assert_eq!(totals.discount_type, Some(DiscountType::Membership));
        assert_eq!(totals.final_amount, dec!(800));
    }

    #[test]
    fn zero_percent_membership_falls_back_to_manual() {
        let lines = items(&[1000.0]);
        let mut input = input(&lines, Role::Owner);
        input.manual_discount = fix(50.0);
        input.membership_discount_percent = Some(Decimal::ZERO);

        let totals = calculate(&input, &CheckoutSettings::default()).unwrap();
        assert_eq!(totals.discount_type, Some(DiscountType::Fix));
        assert_eq!(totals.discount_amount, dec!(50));
    }

    #[test]
    fn non_owner_manual_discount_is_forbidden() {
        let lines = items(&[1000.0]);
        for role in [Role::Staff, Role::Manager] {
            let mut input = input(&lines, role);
            input.manual_discount = fix(1.0);
            let err = calculate(&input, &CheckoutSettings::default()).unwrap_err();
            assert_eq!(
                err,
                BillingError::Forbidden("Only owners can apply discounts".to_string())
            );
        }
    }

    #[test]
    fn sub_cent_manual_discount_is_still_forbidden_for_non_owners() {
        let lines = items(&[1000.0]);
        let cases = [
            ManualDiscount::parse(Some(0.004), Some("fix")).unwrap(),
            ManualDiscount::parse(Some(0.0004), Some("percentage")).unwrap(),
        ];
        for manual in cases {
            let mut input = input(&lines, Role::Staff);
            input.manual_discount = manual;
            assert!(matches!(
                calculate(&input, &CheckoutSettings::default()),
                Err(BillingError::Forbidden(_))
            ));

            input.role = Role::Owner;
            let totals = calculate(&input, &CheckoutSettings::default()).unwrap();
            assert_eq!(totals.discount_amount, Decimal::ZERO);
        }
    }

    #[test]
    fn unrepresentable_manual_discount_is_forbidden_for_non_owners() {
        let lines = items(&[1000.0]);
        let requests = [(1e30, "fix"), (1e-30, "fix"), (1e-29, "percentage")];
        for (amount, kind) in requests {
            let manual = ManualDiscount::parse(Some(amount), Some(kind)).unwrap();
            assert!(manual.is_some(), "{} {} must not be dropped", amount, kind);

            for role in [Role::Staff, Role::Manager] {
                let mut input = input(&lines, role);
                input.manual_discount = manual;
                assert!(matches!(
                    calculate(&input, &CheckoutSettings::default()),
                    Err(BillingError::Forbidden(_))
                ));
            }

            let mut input = input(&lines, Role::Owner);
            input.manual_discount = manual;
            assert!(matches!(
                calculate(&input, &CheckoutSettings::default()),
                Err(BillingError::Validation(_))
            ));
        }
    }

    #[test]
    fn manager_with_ceiling_cannot_overflow_the_percent_check() {
        let lines = items(&[1000.0]);
        let mut settings = CheckoutSettings::default();
        settings.discount_ceilings.manager_percent = dec!(10);

        let mut input = input(&lines, Role::Manager);
        input.manual_discount = fix(7e28);
        assert!(matches!(
            calculate(&input, &settings),
            Err(BillingError::Forbidden(_))
        ));
    }

    #[test]
    fn tax_rate_above_one_hundred_is_rejected() {
        let lines = items(&[10.0]);
        let mut input = input(&lines, Role::Owner);
        input.tax_rate = dec!(100);
        assert!(calculate(&input, &CheckoutSettings::default()).is_ok());

        input.tax_rate = dec!(100.5);
        assert!(matches!(
            calculate(&input, &CheckoutSettings::default()),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn manager_ceiling_allows_discounts_up_to_the_limit() {
        let lines = items(&[1000.0]);
        let mut settings = CheckoutSettings::default();
        settings.discount_ceilings.manager_percent = dec!(10);

        let mut input = input(&lines, Role::Manager);
        input.manual_discount = fix(100.0);
        assert!(calculate(&input, &settings).is_ok());

        input.manual_discount = fix(100.01);
        assert!(matches!(
            calculate(&input, &settings),
            Err(BillingError::Forbidden(_))
        ));
    }

    #[test]
    fn percentage_discount_converts_against_subtotal() {
        let lines = items(&[250.0, 250.0]);
        let mut input = input(&lines, Role::Owner);
        input.manual_discount = Some(ManualDiscount {
            kind: ManualDiscountKind::Percentage,
            amount: 15.0,
        });

        let totals = calculate(&input, &CheckoutSettings::default()).unwrap();
        assert_eq!(totals.discount_amount, dec!(75));
        assert_eq!(totals.discount_type, Some(DiscountType::Percentage));
        assert_eq!(totals.final_amount, dec!(425));
    }

    #[test]
    fn discount_larger_than_subtotal_floors_at_zero() {
        let lines = items(&[100.0]);
        let mut input = input(&lines, Role::Owner);
        input.manual_discount = fix(150.0);
        input.tax_rate = dec!(18);

        let totals = calculate(&input, &CheckoutSettings::default()).unwrap();
        assert_eq!(totals.amount_after_discount, Decimal::ZERO);
        assert_eq!(totals.tax_amount, Decimal::ZERO);
        assert_eq!(totals.final_amount, Decimal::ZERO);
    }

    #[test]
    fn final_amount_matches_closed_form_after_rounding() {
        let settings = CheckoutSettings::default();
        let cases: &[(&[f64], f64, Decimal)] = &[
            (&[333.33, 0.01], 12.5, dec!(18)),
            (&[99.99], 0.0, dec!(5)),
            (&[19.99, 19.99, 19.99], 7.77, dec!(12.5)),
            (&[1.0], 0.0, dec!(0)),
        ];

        for (totals, discount, rate) in cases {
            let lines = items(totals);
            let mut input = input(&lines, Role::Owner);
            input.manual_discount = ManualDiscount::parse(Some(*discount), None).unwrap();
            input.tax_rate = *rate;

            let result = calculate(&input, &settings).unwrap();
            let expected = round_money(
                (result.subtotal - result.discount_amount).max(Decimal::ZERO)
                    * (Decimal::ONE + *rate / Decimal::ONE_HUNDRED),
                settings.money_precision,
            );
            assert_eq!(result.final_amount, expected, "case {:?}", totals);
        }
    }

    #[test]
    fn empty_bill_is_rejected() {
        let input = input(&[], Role::Owner);
        assert!(matches!(
            calculate(&input, &CheckoutSettings::default()),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn negative_tax_is_rejected() {
        let lines = items(&[10.0]);
        let mut input = input(&lines, Role::Owner);
        input.tax_rate = dec!(-1);
        assert!(matches!(
            calculate(&input, &CheckoutSettings::default()),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn parse_manual_discount() {
        assert_eq!(ManualDiscount::parse(None, None), Ok(None));
        assert_eq!(ManualDiscount::parse(Some(0.0), Some("fix")), Ok(None));
        assert_eq!(
            ManualDiscount::parse(Some(10.0), Some("Percentage")),
            Ok(Some(ManualDiscount {
                kind: ManualDiscountKind::Percentage,
                amount: 10.0,
            }))
        );
        assert_eq!(ManualDiscount::parse(Some(10.0), None), Ok(fix(10.0)));
        assert!(ManualDiscount::parse(Some(10.0), Some("bogus")).is_err());
        assert!(ManualDiscount::parse(None, Some("membership")).is_err());
        assert!(ManualDiscount::parse(Some(-1.0), Some("fix")).is_err());
        assert!(ManualDiscount::parse(Some(101.0), Some("percentage")).is_err());
        assert!(ManualDiscount::parse(Some(f64::NAN), None).is_err());
    }

    #[test]
    fn loyalty_points_floor_and_respect_toggle() {
        let mut settings = LoyaltySettings::default();
        assert_eq!(loyalty_points(dec!(1062), &settings), 0);

        settings.enabled = true;
        assert_eq!(loyalty_points(dec!(1062), &settings), 10);
        assert_eq!(loyalty_points(dec!(99.99), &settings), 0);
        assert_eq!(loyalty_points(Decimal::ZERO, &settings), 0);
    }
}
