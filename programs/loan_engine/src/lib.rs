use anchor_lang::prelude::*;
use anchor_lang::system_program;
use anchor_spl::token::{self, Mint, Token, TokenAccount, Transfer};
use liquidity_pool::program::LiquidityPool;
use liquidity_pool::ALLOCATION_SEED;
use position_ledger::program::PositionLedger;
use position_ledger::POSITION_SEED;

declare_id!("Loan111111111111111111111111111111111111111");

// ========== LOAN TERMS ==========
pub const BASIS_POINTS: u64 = 10_000;

/// Share of the loan supplied by the borrower (20%)
pub const COLLATERAL_RATIO: u64 = 2_000;

/// Share of the loan funded by the liquidity pool (80%)
pub const POOL_RATIO: u64 = 8_000;

/// Loans are only accepted at exactly this leverage over collateral
pub const LEVERAGE_MULTIPLIER: u64 = 5;

/// 10% simple annual interest
pub const DEFAULT_INTEREST_RATE: u64 = 1_000;

/// 30 days
pub const DEFAULT_DURATION: i64 = 2_592_000;

/// $100 minimum (6 decimals)
pub const MIN_LOAN_AMOUNT: u64 = 100_000_000;

/// $100,000 maximum (6 decimals)
pub const MAX_LOAN_AMOUNT: u64 = 100_000_000_000;

pub const SECONDS_PER_YEAR: u64 = 31_536_000;

pub const ENGINE_CONFIG_SEED: &[u8] = b"engine_config";
pub const ENGINE_AUTHORITY_SEED: &[u8] = b"engine_authority";
pub const ENGINE_CUSTODY_SEED: &[u8] = b"engine_custody";
pub const LOAN_SEED: &[u8] = b"loan";
pub const BORROWER_LOANS_SEED: &[u8] = b"borrower_loans";
pub const WALLET_SEED: &[u8] = b"wallet";
pub const WALLET_VAULT_SEED: &[u8] = b"wallet_vault";

// Loan Engine runs the loan lifecycle: origination at fixed 5x leverage,
// simple interest accrual, partial and full repayment, and liquidation-driven default.
// Every step that touches the position ledger or the pool goes through a CPI signed
// by the engine authority PDA, so the whole instruction commits or fails as one unit.
#[program]
pub mod loan_engine {
    use super::*;

    /// Initialize engine configuration with admin authority
    pub fn initialize_engine(ctx: Context<InitializeEngine>) -> Result<()> {
        let config = &mut ctx.accounts.engine_config;
        config.admin = ctx.accounts.admin.key();
        config.paused = false;
        config.asset_mint = ctx.accounts.asset_mint.key();
        config.next_loan_id = 1;
        config.interest_rate = DEFAULT_INTEREST_RATE;
        config.duration = DEFAULT_DURATION;
        config.bump = ctx.bumps.engine_config;
        config.authority_bump = ctx.bumps.engine_authority;
        config.custody_bump = ctx.bumps.engine_custody;
        msg!("✅ Loan engine initialized with admin: {}", config.admin);
        msg!("  Engine authority: {}", ctx.accounts.engine_authority.key());
        Ok(())
    }

    /// New defaults apply to loans originated afterwards; open loans keep their snapshot.
    pub fn set_loan_defaults(
        ctx: Context<AdminEngineAction>,
        interest_rate: u64,
        duration: i64,
    ) -> Result<()> {
        let config = &mut ctx.accounts.engine_config;
        config.assert_admin(ctx.accounts.admin.key())?;
        config.set_defaults(interest_rate, duration)?;
        msg!("✅ Loan defaults updated: {}bps, {}s", interest_rate, duration);

        let clock = Clock::get()?;
        emit!(LoanDefaultsUpdated {
            interest_rate,
            duration,
            timestamp: clock.unix_timestamp,
        });
        Ok(())
    }

    pub fn pause_engine(ctx: Context<AdminEngineAction>) -> Result<()> {
        let config = &mut ctx.accounts.engine_config;
        config.assert_admin(ctx.accounts.admin.key())?;
        require!(!config.paused, LoanError::AlreadyPaused);
        config.paused = true;
        msg!("⚠️  Loan engine PAUSED by admin: {}", config.admin);

        let clock = Clock::get()?;
        emit!(EnginePaused {
            admin: config.admin,
            timestamp: clock.unix_timestamp,
        });
        Ok(())
    }

    pub fn unpause_engine(ctx: Context<AdminEngineAction>) -> Result<()> {
        let config = &mut ctx.accounts.engine_config;
        config.assert_admin(ctx.accounts.admin.key())?;
        require!(config.paused, LoanError::NotPaused);
        config.paused = false;
        msg!("✅ Loan engine UNPAUSED by admin: {}", config.admin);

        let clock = Clock::get()?;
        emit!(EngineUnpaused {
            admin: config.admin,
            timestamp: clock.unix_timestamp,
        });
        Ok(())
    }

    pub fn initiate_loan(ctx: Context<InitiateLoan>, desired_amount: u64) -> Result<u64> {
        require!(!ctx.accounts.engine_config.paused, LoanError::ProtocolPaused);

        let terms = assess_origination(
            desired_amount,
            ctx.accounts.borrower_token.amount,
            &ctx.accounts.borrower_loans,
        )?;

        msg!("💰 Loan terms:");
        msg!("  Loan amount: {}", terms.loan_amount);
        msg!("  Borrower collateral (20%): {}", terms.collateral_amount);
        msg!("  Pool allocation (80%): {}", terms.pool_allocation);

        let clock = Clock::get()?;
        let borrower = ctx.accounts.borrower.key();

        // STEP 1: Resolve or provision the execution wallet
        let wallet = &mut ctx.accounts.execution_wallet;
        if wallet.borrower == Pubkey::default() {
            wallet.borrower = borrower;
            wallet.bump = ctx.bumps.execution_wallet;
            wallet.created_at = clock.unix_timestamp;
            msg!("📦 Provisioned execution wallet {}", wallet.key());
            emit!(WalletProvisioned {
                borrower,
                wallet: wallet.key(),
                timestamp: clock.unix_timestamp,
            });
        }
        let wallet_key = wallet.key();

        // STEP 2: Borrower collateral goes straight into the execution wallet
        token::transfer(
            CpiContext::new(
                ctx.accounts.token_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.borrower_token.to_account_info(),
                    to: ctx.accounts.wallet_token.to_account_info(),
                    authority: ctx.accounts.borrower.to_account_info(),
                },
            ),
            terms.collateral_amount,
        )?;
        msg!("✅ Collateral moved to execution wallet");

        let authority_bump = ctx.accounts.engine_config.authority_bump;
        let seeds = &[ENGINE_AUTHORITY_SEED, &[authority_bump]];
        let signer_seeds = &[&seeds[..]];

        // STEP 3: Record the full loan amount as debt against the wallet's position
        position_ledger::cpi::update_borrowed_amount(
            CpiContext::new_with_signer(
                ctx.accounts.position_ledger_program.to_account_info(),
                position_ledger::cpi::accounts::UpdateBorrowedAmount {
                    ledger_config: ctx.accounts.ledger_config.to_account_info(),
                    position: ctx.accounts.position.to_account_info(),
                    wallet: ctx.accounts.execution_wallet.to_account_info(),
                    authority: ctx.accounts.engine_authority.to_account_info(),
                    payer: ctx.accounts.borrower.to_account_info(),
                    system_program: ctx.accounts.system_program.to_account_info(),
                },
                signer_seeds,
            ),
            terms.loan_amount,
        )?;
        msg!("✅ Debt recorded in position ledger");

        // STEP 4: Disburse the pool's share into the same wallet
        liquidity_pool::cpi::allocate(
            CpiContext::new_with_signer(
                ctx.accounts.liquidity_pool_program.to_account_info(),
                liquidity_pool::cpi::accounts::Allocate {
                    pool: ctx.accounts.pool.to_account_info(),
                    pool_vault: ctx.accounts.pool_vault.to_account_info(),
                    allocation: ctx.accounts.allocation.to_account_info(),
                    wallet: ctx.accounts.execution_wallet.to_account_info(),
                    wallet_token: ctx.accounts.wallet_token.to_account_info(),
                    loan_engine: ctx.accounts.engine_authority.to_account_info(),
                    payer: ctx.accounts.borrower.to_account_info(),
                    token_program: ctx.accounts.token_program.to_account_info(),
                    system_program: ctx.accounts.system_program.to_account_info(),
                },
                signer_seeds,
            ),
            terms.pool_allocation,
        )?;
        msg!("✅ Pool allocation disbursed");

        // STEP 5: Persist the loan and index it under the borrower
        grow_borrower_loans(
            &ctx.accounts.borrower_loans.to_account_info(),
            &ctx.accounts.borrower.to_account_info(),
            &ctx.accounts.system_program.to_account_info(),
            ctx.accounts.borrower_loans.loans.len() + 1,
        )?;
        let loan_id = originate_loan(
            &mut ctx.accounts.engine_config,
            &mut ctx.accounts.loan,
            &mut ctx.accounts.borrower_loans,
            borrower,
            wallet_key,
            &terms,
            clock.unix_timestamp,
            ctx.bumps.loan,
        )?;

        let loan = &ctx.accounts.loan;
        msg!("📋 Loan #{} opened for {}", loan_id, borrower);
        msg!("  Rate: {}bps, due: {}", loan.interest_rate, loan.due_date);

        emit!(LoanInitiated {
            loan_id,
            borrower,
            wallet: wallet_key,
            loan_amount: loan.loan_amount,
            collateral_amount: loan.collateral_amount,
            pool_allocation: terms.pool_allocation,
            interest_rate: loan.interest_rate,
            due_date: loan.due_date,
            timestamp: clock.unix_timestamp,
        });

        Ok(loan_id)
    }

    pub fn calculate_total_due(ctx: Context<LoanView>, loan_id: u64) -> Result<u64> {
        ctx.accounts.engine_config.check_loan_id(loan_id)?;
        let clock = Clock::get()?;
        let loan = &ctx.accounts.loan;
        let total_due = loan.total_due(clock.unix_timestamp)?;
        msg!("Loan #{} total due: {} (repaid {})", loan_id, total_due, loan.repaid_amount);
        if loan.is_overdue(clock.unix_timestamp) {
            msg!("  Past due date {}", loan.due_date);
        }
        Ok(total_due)
    }

    /// False for a borrower who has never borrowed.
    pub fn has_active_loan(ctx: Context<BorrowerView>, borrower: Pubkey) -> Result<bool> {
        let history = load_borrower_loans(&ctx.accounts.borrower_loans.to_account_info())?;
        let active = history.is_some_and(|history| history.has_active_loan());
        msg!("Borrower {} active loan: {}", borrower, active);
        Ok(active)
    }

    /// Every loan id ever originated for the borrower, oldest first.
    pub fn borrower_loan_ids(ctx: Context<BorrowerView>, borrower: Pubkey) -> Result<Vec<u64>> {
        let history = load_borrower_loans(&ctx.accounts.borrower_loans.to_account_info())?;
        let loan_ids = history
            .map(|history| history.loan_ids())
            .unwrap_or_default();
        msg!("Borrower {} has {} loans", borrower, loan_ids.len());
        Ok(loan_ids)
    }

    /// Repayment flows borrower -> engine custody -> pool. The ledger's borrowed
    /// amount tracks the outstanding total due, not the original principal.
    pub fn repay_loan(ctx: Context<RepayLoan>, loan_id: u64, amount: u64) -> Result<()> {
        ctx.accounts.engine_config.check_loan_id(loan_id)?;
        let clock = Clock::get()?;
        let outcome = settle_repayment(
            &mut ctx.accounts.loan,
            &mut ctx.accounts.borrower_loans,
            ctx.accounts.borrower.key(),
            amount,
            clock.unix_timestamp,
        )?;

        msg!("💰 Repaying loan #{}", loan_id);
        msg!("  Total due: {}", outcome.total_due);
        msg!("  Payment: {}, outstanding after: {}", amount, outcome.outstanding);

        // STEP 1: Borrower pays into engine custody
        token::transfer(
            CpiContext::new(
                ctx.accounts.token_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.borrower_token.to_account_info(),
                    to: ctx.accounts.engine_custody.to_account_info(),
                    authority: ctx.accounts.borrower.to_account_info(),
                },
            ),
            amount,
        )?;

        let authority_bump = ctx.accounts.engine_config.authority_bump;
        let seeds = &[ENGINE_AUTHORITY_SEED, &[authority_bump]];
        let signer_seeds = &[&seeds[..]];

        // STEP 2: Engine forwards the payment to the pool
        liquidity_pool::cpi::repay(
            CpiContext::new_with_signer(
                ctx.accounts.liquidity_pool_program.to_account_info(),
                liquidity_pool::cpi::accounts::Repay {
                    pool: ctx.accounts.pool.to_account_info(),
                    pool_vault: ctx.accounts.pool_vault.to_account_info(),
                    allocation: ctx.accounts.allocation.to_account_info(),
                    payer_token: ctx.accounts.engine_custody.to_account_info(),
                    payer: ctx.accounts.engine_authority.to_account_info(),
                    token_program: ctx.accounts.token_program.to_account_info(),
                    system_program: ctx.accounts.system_program.to_account_info(),
                },
                signer_seeds,
            ),
            ctx.accounts.loan.wallet,
            amount,
        )?;
        msg!("✅ Payment forwarded to pool");

        // STEP 3: Ledger debt follows the outstanding balance
        position_ledger::cpi::update_borrowed_amount(
            CpiContext::new_with_signer(
                ctx.accounts.position_ledger_program.to_account_info(),
                position_ledger::cpi::accounts::UpdateBorrowedAmount {
                    ledger_config: ctx.accounts.ledger_config.to_account_info(),
                    position: ctx.accounts.position.to_account_info(),
                    wallet: ctx.accounts.execution_wallet.to_account_info(),
                    authority: ctx.accounts.engine_authority.to_account_info(),
                    payer: ctx.accounts.borrower.to_account_info(),
                    system_program: ctx.accounts.system_program.to_account_info(),
                },
                signer_seeds,
            ),
            outcome.outstanding,
        )?;

        let loan = &ctx.accounts.loan;
        emit!(LoanRepaid {
            loan_id,
            borrower: loan.borrower,
            amount,
            repaid_amount: loan.repaid_amount,
            outstanding: outcome.outstanding,
            timestamp: clock.unix_timestamp,
        });

        if outcome.closed {
            msg!("🎉 Loan #{} fully repaid", loan_id);
            emit!(LoanClosed {
                loan_id,
                borrower: ctx.accounts.loan.borrower,
                total_repaid: ctx.accounts.loan.repaid_amount,
                timestamp: clock.unix_timestamp,
            });
        }

        Ok(())
    }

    /// Liquidates the loan's position, defaults the loan and writes off the
    /// pool allocation in a single instruction.
    pub fn liquidate_loan(ctx: Context<LiquidateLoan>, loan_id: u64) -> Result<()> {
        ctx.accounts.engine_config.check_loan_id(loan_id)?;
        require!(
            ctx.accounts.loan.status == LoanStatus::Active,
            LoanError::LoanNotActive
        );

        msg!("🔔 Liquidating loan #{} (wallet {})", loan_id, ctx.accounts.loan.wallet);

        // STEP 1: Ledger liquidation (enforces the ratio threshold)
        position_ledger::cpi::liquidate_position(CpiContext::new(
            ctx.accounts.position_ledger_program.to_account_info(),
            position_ledger::cpi::accounts::LiquidatePosition {
                ledger_config: ctx.accounts.ledger_config.to_account_info(),
                position: ctx.accounts.position.to_account_info(),
                collateral_vault: ctx.accounts.collateral_vault.to_account_info(),
                liquidator_token: ctx.accounts.liquidator_token.to_account_info(),
                liquidator: ctx.accounts.liquidator.to_account_info(),
                token_program: ctx.accounts.token_program.to_account_info(),
            },
        ))?;

        // STEP 2: Loan and index move to Defaulted together
        default_loan(&mut ctx.accounts.loan, &mut ctx.accounts.borrower_loans)?;

        // STEP 3: Pool drops the outstanding allocation
        let authority_bump = ctx.accounts.engine_config.authority_bump;
        let seeds = &[ENGINE_AUTHORITY_SEED, &[authority_bump]];
        let signer_seeds = &[&seeds[..]];

        liquidity_pool::cpi::write_off(CpiContext::new_with_signer(
            ctx.accounts.liquidity_pool_program.to_account_info(),
            liquidity_pool::cpi::accounts::WriteOff {
                pool: ctx.accounts.pool.to_account_info(),
                allocation: ctx.accounts.allocation.to_account_info(),
                loan_engine: ctx.accounts.engine_authority.to_account_info(),
            },
            signer_seeds,
        ))?;
        msg!("✅ Loan #{} defaulted", loan_id);

        let clock = Clock::get()?;
        emit!(LoanDefaulted {
            loan_id,
            borrower: ctx.accounts.loan.borrower,
            liquidator: ctx.accounts.liquidator.key(),
            repaid_amount: ctx.accounts.loan.repaid_amount,
            timestamp: clock.unix_timestamp,
        });

        Ok(())
    }
}

/// Runs the ordered origination checks and returns the split of the loan.
pub fn assess_origination(
    desired_amount: u64,
    borrower_balance: u64,
    history: &BorrowerLoans,
) -> Result<LoanTerms> {
    require!(
        (MIN_LOAN_AMOUNT..=MAX_LOAN_AMOUNT).contains(&desired_amount),
        LoanError::InvalidAmount
    );
    require!(!history.has_active_loan(), LoanError::ActiveLoanExists);

    let collateral_amount = desired_amount
        .checked_mul(COLLATERAL_RATIO)
        .ok_or(LoanError::MathOverflow)?
        / BASIS_POINTS;
    require!(
        borrower_balance >= collateral_amount,
        LoanError::InsufficientBalance
    );
    require!(
        collateral_amount.checked_mul(LEVERAGE_MULTIPLIER) == Some(desired_amount),
        LoanError::InvalidLeverageRatio
    );

    let pool_allocation = desired_amount
        .checked_mul(POOL_RATIO)
        .ok_or(LoanError::MathOverflow)?
        / BASIS_POINTS;

    Ok(LoanTerms {
        loan_amount: desired_amount,
        collateral_amount,
        pool_allocation,
    })
}

/// Opens the loan under the next id, indexes it under the borrower and
/// advances the id counter.
#[allow(clippy::too_many_arguments)]
pub fn originate_loan(
    config: &mut EngineConfig,
    loan: &mut Loan,
    history: &mut BorrowerLoans,
    borrower: Pubkey,
    wallet: Pubkey,
    terms: &LoanTerms,
    now: i64,
    bump: u8,
) -> Result<u64> {
    let loan_id = config.next_loan_id;
    loan.open(
        loan_id,
        borrower,
        wallet,
        terms,
        config.interest_rate,
        config.duration,
        now,
        bump,
    )?;
    history.record(borrower, loan_id)?;
    config.next_loan_id = loan_id.checked_add(1).ok_or(LoanError::MathOverflow)?;
    Ok(loan_id)
}

/// Applies a payment to the loan; a payment that clears the debt also closes
/// the loan's index entry.
pub fn settle_repayment(
    loan: &mut Loan,
    history: &mut BorrowerLoans,
    payer: Pubkey,
    amount: u64,
    now: i64,
) -> Result<RepaymentOutcome> {
    let outcome = loan.apply_repayment(payer, amount, now)?;
    if outcome.closed {
        history.set_status(loan.id, LoanStatus::Repaid)?;
    }
    Ok(outcome)
}

/// Moves the loan and its index entry to Defaulted together.
pub fn default_loan(loan: &mut Loan, history: &mut BorrowerLoans) -> Result<()> {
    loan.mark_defaulted()?;
    history.set_status(loan.id, LoanStatus::Defaulted)
}

fn load_borrower_loans(info: &AccountInfo) -> Result<Option<BorrowerLoans>> {
    let data = info.try_borrow_data()?;
    BorrowerLoans::from_account(info.owner, &data[..])
}

/// Resizes the borrower index to hold `entries` loans, topping up rent from the payer.
fn grow_borrower_loans<'info>(
    index: &AccountInfo<'info>,
    payer: &AccountInfo<'info>,
    system: &AccountInfo<'info>,
    entries: usize,
) -> Result<()> {
    let required = BorrowerLoans::space(entries);
    if index.data_len() >= required {
        return Ok(());
    }

    let shortfall = Rent::get()?
        .minimum_balance(required)
        .saturating_sub(index.lamports());
    if shortfall > 0 {
        system_program::transfer(
            CpiContext::new(
                system.clone(),
                system_program::Transfer {
                    from: payer.clone(),
                    to: index.clone(),
                },
            ),
            shortfall,
        )?;
    }
    index.resize(required)?;
    msg!("📦 Borrower index resized to {} entries", entries);
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoanTerms {
    pub loan_amount: u64,
    pub collateral_amount: u64,
    pub pool_allocation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepaymentOutcome {
    pub total_due: u64,
    pub outstanding: u64,
    pub closed: bool,
}

#[derive(Accounts)]
pub struct InitializeEngine<'info> {
    #[account(
        init,
        payer = admin,
        space = 8 + EngineConfig::LEN,
        seeds = [ENGINE_CONFIG_SEED],
        bump
    )]
    pub engine_config: Account<'info, EngineConfig>,

    /// CHECK: PDA signer for ledger and pool CPIs
    #[account(seeds = [ENGINE_AUTHORITY_SEED], bump)]
    pub engine_authority: UncheckedAccount<'info>,

    pub asset_mint: Account<'info, Mint>,

    /// Intermediate custody for repayments on their way to the pool
    #[account(
        init,
        payer = admin,
        seeds = [ENGINE_CUSTODY_SEED],
        bump,
        token::mint = asset_mint,
        token::authority = engine_authority
    )]
    pub engine_custody: Account<'info, TokenAccount>,

    #[account(mut)]
    pub admin: Signer<'info>,

    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct AdminEngineAction<'info> {
    #[account(mut, seeds = [ENGINE_CONFIG_SEED], bump = engine_config.bump)]
    pub engine_config: Account<'info, EngineConfig>,
    pub admin: Signer<'info>,
}

#[derive(Accounts)]
pub struct InitiateLoan<'info> {
    #[account(mut, seeds = [ENGINE_CONFIG_SEED], bump = engine_config.bump)]
    pub engine_config: Box<Account<'info, EngineConfig>>,

    #[account(
        init,
        payer = borrower,
        space = 8 + Loan::LEN,
        seeds = [LOAN_SEED, &engine_config.next_loan_id.to_le_bytes()],
        bump
    )]
    pub loan: Box<Account<'info, Loan>>,

    #[account(
        init_if_needed,
        payer = borrower,
        space = BorrowerLoans::space(1),
        seeds = [BORROWER_LOANS_SEED, borrower.key().as_ref()],
        bump
    )]
    pub borrower_loans: Box<Account<'info, BorrowerLoans>>,

    #[account(
        init_if_needed,
        payer = borrower,
        space = 8 + ExecutionWallet::LEN,
        seeds = [WALLET_SEED, borrower.key().as_ref()],
        bump
    )]
    pub execution_wallet: Box<Account<'info, ExecutionWallet>>,

    /// Execution wallet's token account (receives collateral and pool allocation)
    #[account(
        init_if_needed,
        payer = borrower,
        seeds = [WALLET_VAULT_SEED, borrower.key().as_ref()],
        bump,
        token::mint = asset_mint,
        token::authority = execution_wallet
    )]
    pub wallet_token: Box<Account<'info, TokenAccount>>,

    #[account(address = engine_config.asset_mint @ LoanError::InvalidMint)]
    pub asset_mint: Box<Account<'info, Mint>>,

    /// Borrower's token account (collateral source)
    #[account(
        mut,
        constraint = borrower_token.owner == borrower.key() @ LoanError::NotBorrower,
        constraint = borrower_token.mint == engine_config.asset_mint @ LoanError::InvalidMint
    )]
    pub borrower_token: Box<Account<'info, TokenAccount>>,

    #[account(mut)]
    pub borrower: Signer<'info>,

    /// CHECK: PDA signer for ledger and pool CPIs
    #[account(seeds = [ENGINE_AUTHORITY_SEED], bump = engine_config.authority_bump)]
    pub engine_authority: UncheckedAccount<'info>,

    // ===== POSITION LEDGER =====
    /// CHECK: validated by the position ledger
    pub ledger_config: UncheckedAccount<'info>,

    /// CHECK: created or updated by the position ledger
    #[account(
        mut,
        seeds = [POSITION_SEED, execution_wallet.key().as_ref()],
        bump,
        seeds::program = position_ledger::ID
    )]
    pub position: UncheckedAccount<'info>,

    // ===== LIQUIDITY POOL =====
    /// CHECK: validated by the liquidity pool
    #[account(mut)]
    pub pool: UncheckedAccount<'info>,

    /// CHECK: validated by the liquidity pool
    #[account(mut)]
    pub pool_vault: UncheckedAccount<'info>,

    /// CHECK: created or updated by the liquidity pool
    #[account(
        mut,
        seeds = [ALLOCATION_SEED, execution_wallet.key().as_ref()],
        bump,
        seeds::program = liquidity_pool::ID
    )]
    pub allocation: UncheckedAccount<'info>,

    pub position_ledger_program: Program<'info, PositionLedger>,
    pub liquidity_pool_program: Program<'info, LiquidityPool>,
    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(loan_id: u64)]
pub struct LoanView<'info> {
    #[account(seeds = [ENGINE_CONFIG_SEED], bump = engine_config.bump)]
    pub engine_config: Account<'info, EngineConfig>,

    #[account(seeds = [LOAN_SEED, &loan_id.to_le_bytes()], bump = loan.bump)]
    pub loan: Account<'info, Loan>,
}

#[derive(Accounts)]
#[instruction(borrower: Pubkey)]
pub struct BorrowerView<'info> {
    /// CHECK: may not exist yet; read only when owned by this program
    #[account(seeds = [BORROWER_LOANS_SEED, borrower.as_ref()], bump)]
    pub borrower_loans: UncheckedAccount<'info>,
}

#[derive(Accounts)]
#[instruction(loan_id: u64)]
pub struct RepayLoan<'info> {
    #[account(seeds = [ENGINE_CONFIG_SEED], bump = engine_config.bump)]
    pub engine_config: Box<Account<'info, EngineConfig>>,

    #[account(
        mut,
        seeds = [LOAN_SEED, &loan_id.to_le_bytes()],
        bump = loan.bump
    )]
    pub loan: Box<Account<'info, Loan>>,

    #[account(
        mut,
        seeds = [BORROWER_LOANS_SEED, loan.borrower.as_ref()],
        bump
    )]
    pub borrower_loans: Box<Account<'info, BorrowerLoans>>,

    /// CHECK: must be the wallet recorded on the loan
    #[account(address = loan.wallet @ LoanError::InvalidLoanId)]
    pub execution_wallet: UncheckedAccount<'info>,

    /// Borrower's token account (payment source)
    #[account(
        mut,
        constraint = borrower_token.owner == borrower.key() @ LoanError::NotBorrower,
        constraint = borrower_token.mint == engine_config.asset_mint @ LoanError::InvalidMint
    )]
    pub borrower_token: Box<Account<'info, TokenAccount>>,

    #[account(mut)]
    pub borrower: Signer<'info>,

    /// CHECK: PDA signer for ledger and pool CPIs
    #[account(mut, seeds = [ENGINE_AUTHORITY_SEED], bump = engine_config.authority_bump)]
    pub engine_authority: UncheckedAccount<'info>,

    #[account(
        mut,
        seeds = [ENGINE_CUSTODY_SEED],
        bump = engine_config.custody_bump
    )]
    pub engine_custody: Box<Account<'info, TokenAccount>>,

    // ===== POSITION LEDGER =====
    /// CHECK: validated by the position ledger
    pub ledger_config: UncheckedAccount<'info>,

    /// CHECK: validated by the position ledger
    #[account(
        mut,
        seeds = [POSITION_SEED, loan.wallet.as_ref()],
        bump,
        seeds::program = position_ledger::ID
    )]
    pub position: UncheckedAccount<'info>,

    // ===== LIQUIDITY POOL =====
    /// CHECK: validated by the liquidity pool
    #[account(mut)]
    pub pool: UncheckedAccount<'info>,

    /// CHECK: validated by the liquidity pool
    #[account(mut)]
    pub pool_vault: UncheckedAccount<'info>,

    /// CHECK: validated by the liquidity pool
    #[account(
        mut,
        seeds = [ALLOCATION_SEED, loan.wallet.as_ref()],
        bump,
        seeds::program = liquidity_pool::ID
    )]
    pub allocation: UncheckedAccount<'info>,

    pub position_ledger_program: Program<'info, PositionLedger>,
    pub liquidity_pool_program: Program<'info, LiquidityPool>,
    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(loan_id: u64)]
pub struct LiquidateLoan<'info> {
    #[account(seeds = [ENGINE_CONFIG_SEED], bump = engine_config.bump)]
    pub engine_config: Box<Account<'info, EngineConfig>>,

    #[account(
        mut,
        seeds = [LOAN_SEED, &loan_id.to_le_bytes()],
        bump = loan.bump
    )]
    pub loan: Box<Account<'info, Loan>>,

    #[account(
        mut,
        seeds = [BORROWER_LOANS_SEED, loan.borrower.as_ref()],
        bump
    )]
    pub borrower_loans: Box<Account<'info, BorrowerLoans>>,

    /// CHECK: PDA signer for the pool write-off
    #[account(seeds = [ENGINE_AUTHORITY_SEED], bump = engine_config.authority_bump)]
    pub engine_authority: UncheckedAccount<'info>,

    // ===== POSITION LEDGER =====
    /// CHECK: validated by the position ledger
    pub ledger_config: UncheckedAccount<'info>,

    /// CHECK: validated by the position ledger
    #[account(
        mut,
        seeds = [POSITION_SEED, loan.wallet.as_ref()],
        bump,
        seeds::program = position_ledger::ID
    )]
    pub position: UncheckedAccount<'info>,

    /// CHECK: validated by the position ledger
    #[account(mut)]
    pub collateral_vault: UncheckedAccount<'info>,

    /// CHECK: validated by the position ledger
    #[account(mut)]
    pub liquidator_token: UncheckedAccount<'info>,

    pub liquidator: Signer<'info>,

    // ===== LIQUIDITY POOL =====
    /// CHECK: validated by the liquidity pool
    #[account(mut)]
    pub pool: UncheckedAccount<'info>,

    /// CHECK: validated by the liquidity pool
    #[account(
        mut,
        seeds = [ALLOCATION_SEED, loan.wallet.as_ref()],
        bump,
        seeds::program = liquidity_pool::ID
    )]
    pub allocation: UncheckedAccount<'info>,

    pub position_ledger_program: Program<'info, PositionLedger>,
    pub liquidity_pool_program: Program<'info, LiquidityPool>,
    pub token_program: Program<'info, Token>,
}

#[account]
#[derive(Default)]
pub struct EngineConfig {
    pub admin: Pubkey,
    pub paused: bool,
    pub asset_mint: Pubkey,
    pub next_loan_id: u64,
    pub interest_rate: u64,
    pub duration: i64,
    pub bump: u8,
    pub authority_bump: u8,
    pub custody_bump: u8,
}

impl EngineConfig {
    pub const LEN: usize = 32 + 1 + 32 + 8 + 8 + 8 + 1 + 1 + 1;

    pub fn assert_admin(&self, admin: Pubkey) -> Result<()> {
        require_keys_eq!(admin, self.admin, LoanError::Unauthorized);
        Ok(())
    }

    /// Loan ids are dense, starting at 1.
    pub fn check_loan_id(&self, loan_id: u64) -> Result<()> {
        require!(
            loan_id >= 1 && loan_id < self.next_loan_id,
            LoanError::InvalidLoanId
        );
        Ok(())
    }

    pub fn set_defaults(&mut self, interest_rate: u64, duration: i64) -> Result<()> {
        require!(interest_rate <= BASIS_POINTS, LoanError::InvalidLoanTerms);
        require!(duration > 0, LoanError::InvalidLoanTerms);
        self.interest_rate = interest_rate;
        self.duration = duration;
        Ok(())
    }
}

#[account]
#[derive(Default)]
pub struct Loan {
    pub id: u64,
    pub borrower: Pubkey,
    pub loan_amount: u64,
    pub collateral_amount: u64,
    pub interest_rate: u64,
    pub start_time: i64,
    pub duration: i64,
    pub due_date: i64,
    pub repaid_amount: u64,
    pub wallet: Pubkey,
    pub status: LoanStatus,
    pub bump: u8,
}

impl Loan {
    pub const LEN: usize = 8 // id
        + 32 // borrower
        + 8 // loan_amount
        + 8 // collateral_amount
        + 8 // interest_rate
        + 8 // start_time
        + 8 // duration
        + 8 // due_date
        + 8 // repaid_amount
        + 32 // wallet
        + 1 // status
        + 1; // bump

    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &mut self,
        id: u64,
        borrower: Pubkey,
        wallet: Pubkey,
        terms: &LoanTerms,
        interest_rate: u64,
        duration: i64,
        now: i64,
        bump: u8,
    ) -> Result<()> {
        self.id = id;
        self.borrower = borrower;
        self.loan_amount = terms.loan_amount;
        self.collateral_amount = terms.collateral_amount;
        self.interest_rate = interest_rate;
        self.start_time = now;
        self.duration = duration;
        self.due_date = now.checked_add(duration).ok_or(LoanError::MathOverflow)?;
        self.repaid_amount = 0;
        self.wallet = wallet;
        self.status = LoanStatus::Active;
        self.bump = bump;
        Ok(())
    }

    /// Principal plus simple interest for the time elapsed since origination.
    /// Keeps accruing past the due date.
    pub fn total_due(&self, now: i64) -> Result<u64> {
        let elapsed = now.saturating_sub(self.start_time).max(0) as u128;
        let interest = (self.loan_amount as u128)
            .checked_mul(self.interest_rate as u128)
            .and_then(|v| v.checked_mul(elapsed))
            .ok_or(LoanError::MathOverflow)?
            / ((BASIS_POINTS as u128) * (SECONDS_PER_YEAR as u128));
        u64::try_from(self.loan_amount as u128 + interest)
            .map_err(|_| error!(LoanError::MathOverflow))
    }

    pub fn remaining_debt(&self, now: i64) -> Result<u64> {
        Ok(self.total_due(now)?.saturating_sub(self.repaid_amount))
    }

    pub fn is_overdue(&self, now: i64) -> bool {
        now > self.due_date
    }

    pub fn apply_repayment(
        &mut self,
        payer: Pubkey,
        amount: u64,
        now: i64,
    ) -> Result<RepaymentOutcome> {
        require_keys_eq!(payer, self.borrower, LoanError::NotBorrower);
        require!(self.status == LoanStatus::Active, LoanError::LoanNotActive);
        require!(amount > 0, LoanError::InvalidAmount);

        let remaining = self.remaining_debt(now)?;
        require!(amount <= remaining, LoanError::ExceedsRemainingDebt);
        let total_due = self.repaid_amount + remaining;

        self.repaid_amount = self
            .repaid_amount
            .checked_add(amount)
            .ok_or(LoanError::MathOverflow)?;
        let outstanding = remaining - amount;
        let closed = outstanding == 0;
        if closed {
            self.status = LoanStatus::Repaid;
        }

        Ok(RepaymentOutcome {
            total_due,
            outstanding,
            closed,
        })
    }

    pub fn mark_defaulted(&mut self) -> Result<()> {
        require!(self.status == LoanStatus::Active, LoanError::LoanNotActive);
        self.status = LoanStatus::Defaulted;
        Ok(())
    }
}

// Pending is never assigned by origination; loans start Active.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoanStatus {
    #[default]
    Pending,
    Active,
    Repaid,
    Defaulted,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoanEntry {
    pub loan_id: u64,
    pub status: LoanStatus,
}

impl LoanEntry {
    pub const LEN: usize = 8 + 1;
}

/// Append-only loan history per borrower. The account grows by one entry per
/// origination.
#[account]
#[derive(Default)]
pub struct BorrowerLoans {
    pub borrower: Pubkey,
    pub loans: Vec<LoanEntry>,
}

impl BorrowerLoans {
    /// Account size, discriminator included, for `entries` loans.
    pub const fn space(entries: usize) -> usize {
        8 + 32 + 4 + entries * LoanEntry::LEN
    }

    /// None when the account was never created by this program.
    pub fn from_account(owner: &Pubkey, data: &[u8]) -> Result<Option<Self>> {
        if owner != &crate::ID || data.is_empty() {
            return Ok(None);
        }
        let mut data = data;
        Ok(Some(Self::try_deserialize(&mut data)?))
    }

    /// Most recent loan still Active, if any.
    pub fn active_loan(&self) -> Option<u64> {
        self.loans
            .iter()
            .rev()
            .find(|entry| entry.status == LoanStatus::Active)
            .map(|entry| entry.loan_id)
    }

    pub fn has_active_loan(&self) -> bool {
        self.active_loan().is_some()
    }

    pub fn loan_ids(&self) -> Vec<u64> {
        self.loans.iter().map(|entry| entry.loan_id).collect()
    }

    pub fn record(&mut self, borrower: Pubkey, loan_id: u64) -> Result<()> {
        if self.borrower == Pubkey::default() {
            self.borrower = borrower;
        }
        self.loans.push(LoanEntry {
            loan_id,
            status: LoanStatus::Active,
        });
        Ok(())
    }

    pub fn set_status(&mut self, loan_id: u64, status: LoanStatus) -> Result<()> {
        let entry = self
            .loans
            .iter_mut()
            .rev()
            .find(|entry| entry.loan_id == loan_id)
            .ok_or(LoanError::InvalidLoanId)?;
        entry.status = status;
        Ok(())
    }
}

#[account]
#[derive(Default)]
pub struct ExecutionWallet {
    pub borrower: Pubkey,
    pub created_at: i64,
    pub bump: u8,
}

impl ExecutionWallet {
    pub const LEN: usize = 32 + 8 + 1;
}

#[event]
pub struct LoanInitiated {
    pub loan_id: u64,
    pub borrower: Pubkey,
    pub wallet: Pubkey,
    pub loan_amount: u64,
    pub collateral_amount: u64,
    pub pool_allocation: u64,
    pub interest_rate: u64,
    pub due_date: i64,
    pub timestamp: i64,
}

#[event]
pub struct LoanRepaid {
    pub loan_id: u64,
    pub borrower: Pubkey,
    pub amount: u64,
    pub repaid_amount: u64,
    pub outstanding: u64,
    pub timestamp: i64,
}

#[event]
pub struct LoanClosed {
    pub loan_id: u64,
    pub borrower: Pubkey,
    pub total_repaid: u64,
    pub timestamp: i64,
}

#[event]
pub struct LoanDefaulted {
    pub loan_id: u64,
    pub borrower: Pubkey,
    pub liquidator: Pubkey,
    pub repaid_amount: u64,
    pub timestamp: i64,
}

#[event]
pub struct WalletProvisioned {
    pub borrower: Pubkey,
    pub wallet: Pubkey,
    pub timestamp: i64,
}

#[event]
pub struct LoanDefaultsUpdated {
    pub interest_rate: u64,
    pub duration: i64,
    pub timestamp: i64,
}

#[event]
pub struct EnginePaused {
    pub admin: Pubkey,
    pub timestamp: i64,
}

#[event]
pub struct EngineUnpaused {
    pub admin: Pubkey,
    pub timestamp: i64,
}

#[error_code]
pub enum LoanError {
    #[msg("Loan amount outside the allowed range")]
    InvalidAmount,
    #[msg("Loan does not exist")]
    InvalidLoanId,
    #[msg("Caller is not the borrower")]
    NotBorrower,
    #[msg("Borrower already has an active loan")]
    ActiveLoanExists,
    #[msg("Insufficient balance for the required collateral")]
    InsufficientBalance,
    #[msg("Loan must be exactly 5x the collateral")]
    InvalidLeverageRatio,
    #[msg("Loan is not active")]
    LoanNotActive,
    #[msg("Repayment exceeds remaining debt")]
    ExceedsRemainingDebt,
    #[msg("Protocol is paused")]
    ProtocolPaused,
    #[msg("Protocol is already paused")]
    AlreadyPaused,
    #[msg("Protocol is not paused")]
    NotPaused,
    #[msg("Unauthorized")]
    Unauthorized,
    #[msg("Invalid loan terms")]
    InvalidLoanTerms,
    #[msg("Token account mint does not match the loan asset")]
    InvalidMint,
    #[msg("Overflow during math operation")]
    MathOverflow,
}
