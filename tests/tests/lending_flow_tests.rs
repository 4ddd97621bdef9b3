//! End-to-end lending flows over the state layer, with token movements
//! mirrored in the simulated asset ledger.

use anchor_lang::prelude::Pubkey;
use lending_engine_tests::{assert_anchor_error, usdc, AssetLedger, SECONDS_PER_DAY};
use liquidity_pool::{Allocation, PoolState};
use loan_engine::{
    assess_origination, default_loan, originate_loan, settle_repayment, BorrowerLoans,
    EngineConfig, Loan, LoanError, LoanStatus, DEFAULT_DURATION, DEFAULT_INTEREST_RATE,
};
use position_ledger::{Position, PositionError};

const START: i64 = 1_700_000_000;

/// Custody and participant addresses for one lending market.
struct Market {
    assets: AssetLedger,
    pool: PoolState,
    pool_vault: Pubkey,
    engine: EngineConfig,
    engine_custody: Pubkey,
    ledger_vault: Pubkey,
}

impl Market {
    fn new() -> Self {
        Self {
            assets: AssetLedger::new(),
            pool: PoolState {
                authority: Pubkey::new_unique(),
                loan_engine: Pubkey::new_unique(),
                asset_mint: Pubkey::new_unique(),
                ..PoolState::default()
            },
            pool_vault: Pubkey::new_unique(),
            engine: EngineConfig {
                admin: Pubkey::new_unique(),
                asset_mint: Pubkey::new_unique(),
                next_loan_id: 1,
                interest_rate: DEFAULT_INTEREST_RATE,
                duration: DEFAULT_DURATION,
                ..EngineConfig::default()
            },
            engine_custody: Pubkey::new_unique(),
            ledger_vault: Pubkey::new_unique(),
        }
    }

    fn provide_liquidity(&mut self, lp: Pubkey, amount: u64) -> anyhow::Result<u64> {
        self.assets.transfer(lp, self.pool_vault, amount)?;
        Ok(self.pool.deposit(amount).expect("pool deposit"))
    }
}

/// A borrower's on-chain footprint.
struct Borrower {
    key: Pubkey,
    wallet: Pubkey,
    history: BorrowerLoans,
    position: Position,
    allocation: Allocation,
}

impl Borrower {
    fn new() -> Self {
        let wallet = Pubkey::new_unique();
        Self {
            key: Pubkey::new_unique(),
            wallet,
            history: BorrowerLoans::default(),
            position: Position {
                wallet,
                ..Position::default()
            },
            allocation: Allocation { wallet, amount: 0 },
        }
    }
}

/// Origination in the same order the engine runs it.
fn originate(
    market: &mut Market,
    borrower: &mut Borrower,
    desired_amount: u64,
    now: i64,
) -> anyhow::Result<Loan> {
    let terms = assess_origination(
        desired_amount,
        market.assets.balance_of(&borrower.key),
        &borrower.history,
    )
    .expect("origination terms");

    market
        .assets
        .transfer(borrower.key, borrower.wallet, terms.collateral_amount)?;
    borrower.position.borrowed_amount = terms.loan_amount;

    let custody = market.assets.balance_of(&market.pool_vault);
    market
        .pool
        .allocate(&mut borrower.allocation, terms.pool_allocation, custody)
        .expect("allocate");
    market
        .assets
        .transfer(market.pool_vault, borrower.wallet, terms.pool_allocation)?;

    let mut loan = Loan::default();
    originate_loan(
        &mut market.engine,
        &mut loan,
        &mut borrower.history,
        borrower.key,
        borrower.wallet,
        &terms,
        now,
        255,
    )
    .expect("originate loan");
    Ok(loan)
}

/// Repayment: borrower -> engine custody -> pool, ledger follows the outstanding balance.
fn repay(
    market: &mut Market,
    borrower: &mut Borrower,
    loan: &mut Loan,
    amount: u64,
    now: i64,
) -> anyhow::Result<()> {
    market.engine.check_loan_id(loan.id).expect("known loan");
    let outcome = settle_repayment(loan, &mut borrower.history, borrower.key, amount, now)
        .expect("repayment");

    market.assets.transfer(borrower.key, market.engine_custody, amount)?;
    market.assets.approve(market.engine_custody, market.pool_vault, amount);
    market
        .assets
        .transfer_from(market.pool_vault, market.engine_custody, market.pool_vault, amount)?;
    market
        .pool
        .repay(&mut borrower.allocation, amount)
        .expect("pool repay");

    borrower.position.borrowed_amount = outcome.outstanding;
    Ok(())
}

#[test]
fn test_origination_funds_execution_wallet() -> anyhow::Result<()> {
    let mut market = Market::new();
    let lp = Pubkey::new_unique();
    market.assets.mint_to(lp, usdc(100_000))?;
    market.provide_liquidity(lp, usdc(100_000))?;

    let mut borrower = Borrower::new();
    market.assets.mint_to(borrower.key, usdc(10_000))?;

    let loan = originate(&mut market, &mut borrower, usdc(25_000), START)?;

    assert_eq!(loan.id, 1);
    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(loan.collateral_amount, usdc(5_000));
    assert_eq!(market.assets.balance_of(&borrower.wallet), usdc(25_000));
    assert_eq!(market.assets.balance_of(&borrower.key), usdc(5_000));
    assert_eq!(market.pool.total_assets, usdc(80_000));
    assert_eq!(market.pool.total_allocated, usdc(20_000));
    assert_eq!(market.assets.balance_of(&market.pool_vault), usdc(80_000));
    assert_eq!(borrower.position.borrowed_amount, usdc(25_000));
    assert!(borrower.history.has_active_loan());
    Ok(())
}

#[test]
fn test_second_origination_rejected_while_active() -> anyhow::Result<()> {
    let mut market = Market::new();
    let lp = Pubkey::new_unique();
    market.assets.mint_to(lp, usdc(100_000))?;
    market.provide_liquidity(lp, usdc(100_000))?;

    let mut borrower = Borrower::new();
    market.assets.mint_to(borrower.key, usdc(20_000))?;
    originate(&mut market, &mut borrower, usdc(25_000), START)?;

    assert_anchor_error(
        assess_origination(
            usdc(25_000),
            market.assets.balance_of(&borrower.key),
            &borrower.history,
        ),
        u32::from(LoanError::ActiveLoanExists),
    );
    Ok(())
}

#[test]
fn test_one_year_full_repayment_closes_loan() -> anyhow::Result<()> {
    let mut market = Market::new();
    let lp = Pubkey::new_unique();
    market.assets.mint_to(lp, usdc(100_000))?;
    market.provide_liquidity(lp, usdc(100_000))?;

    let mut borrower = Borrower::new();
    market.assets.mint_to(borrower.key, usdc(10_000))?;
    let mut loan = originate(&mut market, &mut borrower, usdc(25_000), START)?;

    let one_year = START + 365 * SECONDS_PER_DAY;
    assert_eq!(loan.total_due(one_year).expect("total due"), usdc(27_500));

    // the borrower pulls the wallet's funds back out to settle
    market.assets.transfer(borrower.wallet, borrower.key, usdc(25_000))?;
    repay(&mut market, &mut borrower, &mut loan, usdc(27_500), one_year)?;

    assert_eq!(loan.status, LoanStatus::Repaid);
    assert_eq!(loan.repaid_amount, usdc(27_500));
    assert_eq!(borrower.position.borrowed_amount, 0);
    assert!(!borrower.history.has_active_loan());

    // principal clears the allocation, interest stays with LPs
    assert_eq!(borrower.allocation.amount, 0);
    assert_eq!(market.pool.total_allocated, 0);
    assert_eq!(market.pool.total_assets, usdc(107_500));
    assert_eq!(market.assets.balance_of(&market.pool_vault), usdc(107_500));
    assert_eq!(market.assets.balance_of(&market.engine_custody), 0);

    // a fresh loan is allowed once the previous one is closed
    let terms = assess_origination(usdc(1_000), usdc(200), &borrower.history)
        .expect("new loan after repayment");
    assert_eq!(terms.collateral_amount, usdc(200));
    Ok(())
}

#[test]
fn test_partial_repayments_track_ledger_debt() -> anyhow::Result<()> {
    let mut market = Market::new();
    let lp = Pubkey::new_unique();
    market.assets.mint_to(lp, usdc(100_000))?;
    market.provide_liquidity(lp, usdc(100_000))?;

    let mut borrower = Borrower::new();
    market.assets.mint_to(borrower.key, usdc(30_000))?;
    let mut loan = originate(&mut market, &mut borrower, usdc(25_000), START)?;

    repay(&mut market, &mut borrower, &mut loan, usdc(10_000), START)?;
    assert_eq!(borrower.position.borrowed_amount, usdc(15_000));
    assert_eq!(borrower.allocation.amount, usdc(10_000));
    assert_eq!(loan.status, LoanStatus::Active);

    let err = loan
        .apply_repayment(borrower.key, usdc(15_000) + 1, START)
        .unwrap_err();
    assert_eq!(
        lending_engine_tests::anchor_error_code(&err),
        Some(u32::from(LoanError::ExceedsRemainingDebt))
    );
    Ok(())
}

#[test]
fn test_liquidation_pays_liquidator() -> anyhow::Result<()> {
    let mut market = Market::new();
    let liquidator = Pubkey::new_unique();
    let mut position = Position {
        wallet: Pubkey::new_unique(),
        ..Position::default()
    };

    let depositor = Pubkey::new_unique();
    market.assets.mint_to(depositor, usdc(1_000))?;
    position.deposit(usdc(1_000), usdc(5_000)).expect("deposit");
    market.assets.transfer(depositor, market.ledger_vault, usdc(1_000))?;
    position.borrowed_amount = usdc(10_000);

    assert!(position.is_liquidatable());
    let seized = position.liquidate().expect("liquidate");
    market.assets.transfer(market.ledger_vault, liquidator, seized)?;

    assert_eq!(market.assets.balance_of(&liquidator), usdc(1_000));
    assert_eq!(position.collateral_amount, 0);
    assert_eq!(position.borrowed_amount, 0);
    Ok(())
}

#[test]
fn test_undercollateralized_deposit_rejected() {
    let mut position = Position::default();
    assert_anchor_error(
        position.deposit(usdc(1_000), usdc(10_000)),
        u32::from(PositionError::UndercollateralizedRequest),
    );
}

#[test]
fn test_default_unit_of_work() -> anyhow::Result<()> {
    let mut market = Market::new();
    let lp = Pubkey::new_unique();
    market.assets.mint_to(lp, usdc(100_000))?;
    market.provide_liquidity(lp, usdc(100_000))?;

    let mut borrower = Borrower::new();
    market.assets.mint_to(borrower.key, usdc(10_000))?;
    let mut loan = originate(&mut market, &mut borrower, usdc(25_000), START)?;

    // collateral posted through the ledger, then the market moves against it
    borrower.position.collateral_amount = usdc(3_000);
    assert!(borrower.position.is_liquidatable());

    borrower.position.liquidate().expect("ledger liquidation");
    default_loan(&mut loan, &mut borrower.history).expect("default loan");
    let written_off = market
        .pool
        .write_off(&mut borrower.allocation)
        .expect("write off");

    assert_eq!(written_off, usdc(20_000));
    assert_eq!(loan.status, LoanStatus::Defaulted);
    assert!(!borrower.history.has_active_loan());
    assert_eq!(market.pool.total_allocated, 0);
    assert_eq!(market.pool.pool_value().expect("pool value"), usdc(80_000));
    assert_eq!(borrower.position.borrowed_amount, 0);
    Ok(())
}

#[test]
fn test_repeat_borrower_beyond_thirty_two_loans() -> anyhow::Result<()> {
    let mut market = Market::new();
    let lp = Pubkey::new_unique();
    market.assets.mint_to(lp, usdc(100_000))?;
    market.provide_liquidity(lp, usdc(100_000))?;

    // each round costs the borrower the 20% collateral
    let mut borrower = Borrower::new();
    market.assets.mint_to(borrower.key, usdc(200) * 33)?;

    for round in 1..=33u64 {
        let mut loan = originate(&mut market, &mut borrower, usdc(1_000), START)?;
        assert_eq!(loan.id, round);

        market.assets.transfer(borrower.wallet, borrower.key, usdc(1_000))?;
        repay(&mut market, &mut borrower, &mut loan, usdc(1_000), START)?;
        assert_eq!(loan.status, LoanStatus::Repaid);
    }

    assert_eq!(borrower.history.loans.len(), 33);
    assert_eq!(borrower.history.loan_ids().last(), Some(&33));
    assert!(!borrower.history.has_active_loan());
    assert_eq!(market.pool.total_allocated, 0);
    assert_eq!(market.engine.next_loan_id, 34);
    Ok(())
}
