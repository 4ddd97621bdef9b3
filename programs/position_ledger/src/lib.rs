use anchor_lang::prelude::*;
use anchor_spl::token::{self, Mint, Token, TokenAccount, Transfer};

declare_id!("Posn111111111111111111111111111111111111111");

// ========== POSITION LEDGER CONSTANTS ==========
pub const BASIS_POINTS: u64 = 10_000;

/// Minimum collateral ratio for a position to be considered safe (20%)
pub const MIN_COLLATERAL_RATIO: u64 = 2_000;

/// Positions below this ratio can be liquidated by anyone (15%)
pub const LIQUIDATION_THRESHOLD: u64 = 1_500;

/// Maximum leverage against deposited collateral (5x)
pub const MAX_LEVERAGE_RATIO: u64 = 50_000;

/// Ratio reported for positions without debt
pub const INFINITE_RATIO: u64 = u64::MAX;

pub const LEDGER_CONFIG_SEED: &[u8] = b"ledger_config";
pub const POSITION_SEED: &[u8] = b"position";
pub const COLLATERAL_VAULT_SEED: &[u8] = b"collateral_vault";

// Position Ledger is the source of truth for per-wallet collateral and debt.
// It custodies deposited collateral and answers solvency queries.
#[program]
pub mod position_ledger {
    use super::*;

    /// Create the ledger config and its collateral custody account.
    /// The signer becomes the ledger admin.
    pub fn initialize_ledger(
        ctx: Context<InitializeLedger>,
        liquidity_pool: Pubkey,
        loan_engine: Pubkey,
    ) -> Result<()> {
        let config = &mut ctx.accounts.ledger_config;
        config.admin = ctx.accounts.admin.key();
        config.liquidity_pool = liquidity_pool;
        config.loan_engine = loan_engine;
        config.collateral_mint = ctx.accounts.collateral_mint.key();
        config.bump = ctx.bumps.ledger_config;
        config.vault_bump = ctx.bumps.collateral_vault;
        msg!("✅ Position ledger initialized with admin: {}", config.admin);
        msg!("  Authorized pool: {}", liquidity_pool);
        msg!("  Authorized loan engine: {}", loan_engine);
        Ok(())
    }

    pub fn set_authorized_callers(
        ctx: Context<AdminLedgerAction>,
        liquidity_pool: Pubkey,
        loan_engine: Pubkey,
    ) -> Result<()> {
        let config = &mut ctx.accounts.ledger_config;
        config.authorize(ctx.accounts.admin.key(), &[Role::Admin])?;
        config.liquidity_pool = liquidity_pool;
        config.loan_engine = loan_engine;
        msg!("✅ Authorized callers updated: pool={}, engine={}", liquidity_pool, loan_engine);
        Ok(())
    }

    pub fn deposit_collateral(
        ctx: Context<DepositCollateral>,
        wallet: Pubkey,
        amount: u64,
        intended_loan_amount: u64,
    ) -> Result<()> {
        let position = &mut ctx.accounts.position;
        if position.wallet == Pubkey::default() {
            position.wallet = wallet;
            position.bump = ctx.bumps.position;
        }

        let ratio = position.deposit(amount, intended_loan_amount)?;
        msg!(
            "Depositing {} collateral for intended loan {} (ratio {}bps)",
            amount,
            intended_loan_amount,
            ratio
        );

        token::transfer(
            CpiContext::new(
                ctx.accounts.token_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.depositor_token.to_account_info(),
                    to: ctx.accounts.collateral_vault.to_account_info(),
                    authority: ctx.accounts.depositor.to_account_info(),
                },
            ),
            amount,
        )?;

        let clock = Clock::get()?;
        emit!(CollateralDeposited {
            wallet,
            depositor: ctx.accounts.depositor.key(),
            amount,
            intended_loan_amount,
            collateral_amount: ctx.accounts.position.collateral_amount,
            timestamp: clock.unix_timestamp,
        });

        Ok(())
    }

    /// Only the position's wallet may withdraw, and only while it carries no debt.
    pub fn withdraw_collateral(ctx: Context<WithdrawCollateral>, amount: u64) -> Result<()> {
        ctx.accounts.position.withdraw(amount)?;

        let bump = ctx.accounts.ledger_config.bump;
        let seeds = &[LEDGER_CONFIG_SEED, &[bump]];
        let signer_seeds = &[&seeds[..]];

        token::transfer(
            CpiContext::new_with_signer(
                ctx.accounts.token_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.collateral_vault.to_account_info(),
                    to: ctx.accounts.wallet_token.to_account_info(),
                    authority: ctx.accounts.ledger_config.to_account_info(),
                },
                signer_seeds,
            ),
            amount,
        )?;
        msg!("✅ Withdrew {} collateral to wallet {}", amount, ctx.accounts.wallet.key());

        let clock = Clock::get()?;
        emit!(CollateralWithdrawn {
            wallet: ctx.accounts.wallet.key(),
            amount,
            remaining_collateral: ctx.accounts.position.collateral_amount,
            timestamp: clock.unix_timestamp,
        });

        Ok(())
    }

    pub fn release_collateral(ctx: Context<ReleaseCollateral>) -> Result<()> {
        let released = ctx.accounts.position.release()?;

        let bump = ctx.accounts.ledger_config.bump;
        let seeds = &[LEDGER_CONFIG_SEED, &[bump]];
        let signer_seeds = &[&seeds[..]];

        token::transfer(
            CpiContext::new_with_signer(
                ctx.accounts.token_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.collateral_vault.to_account_info(),
                    to: ctx.accounts.wallet_token.to_account_info(),
                    authority: ctx.accounts.ledger_config.to_account_info(),
                },
                signer_seeds,
            ),
            released,
        )?;
        msg!("✅ Released {} collateral to wallet {}", released, ctx.accounts.position.wallet);

        let clock = Clock::get()?;
        emit!(CollateralReleased {
            wallet: ctx.accounts.position.wallet,
            amount: released,
            timestamp: clock.unix_timestamp,
        });

        Ok(())
    }

    /// Sets the absolute debt tracked against a position. Callers compute deltas themselves.
    pub fn update_borrowed_amount(
        ctx: Context<UpdateBorrowedAmount>,
        new_amount: u64,
    ) -> Result<()> {
        let role = ctx.accounts.ledger_config.authorize(
            ctx.accounts.authority.key(),
            &[Role::Pool, Role::LoanEngine, Role::Admin],
        )?;

        let position = &mut ctx.accounts.position;
        if position.wallet == Pubkey::default() {
            position.wallet = ctx.accounts.wallet.key();
            position.bump = ctx.bumps.position;
        }

        let previous_amount = position.borrowed_amount;
        position.borrowed_amount = new_amount;
        msg!(
            "Borrowed amount for {}: {} -> {} ({:?})",
            position.wallet,
            previous_amount,
            new_amount,
            role
        );

        let clock = Clock::get()?;
        emit!(BorrowedAmountUpdated {
            wallet: position.wallet,
            previous_amount,
            new_amount,
            role,
            timestamp: clock.unix_timestamp,
        });

        Ok(())
    }

    pub fn position_health(ctx: Context<PositionView>) -> Result<PositionHealth> {
        let health = ctx.accounts.position.health()?;
        msg!("Position health for {}:", ctx.accounts.position.wallet);
        msg!("  Collateral ratio: {}bps", health.collateral_ratio);
        msg!("  Liquidatable: {}, safe: {}", health.liquidatable, health.safe);
        msg!("  Max borrowable: {}", health.max_borrowable);
        Ok(health)
    }

    /// Permissionless liquidation below 15%. The liquidator receives the full
    /// collateral balance and both sides of the position are zeroed.
    pub fn liquidate_position(ctx: Context<LiquidatePosition>) -> Result<()> {
        let position = &mut ctx.accounts.position;
        let ratio = position.collateral_ratio();
        let debt_cleared = position.borrowed_amount;
        let seized = position.liquidate()?;

        msg!("🔔 LIQUIDATION of {}", position.wallet);
        msg!("  Collateral ratio: {}bps (threshold {}bps)", ratio, LIQUIDATION_THRESHOLD);
        msg!("  Seizing {} collateral, clearing {} debt", seized, debt_cleared);

        let bump = ctx.accounts.ledger_config.bump;
        let seeds = &[LEDGER_CONFIG_SEED, &[bump]];
        let signer_seeds = &[&seeds[..]];

        token::transfer(
            CpiContext::new_with_signer(
                ctx.accounts.token_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.collateral_vault.to_account_info(),
                    to: ctx.accounts.liquidator_token.to_account_info(),
                    authority: ctx.accounts.ledger_config.to_account_info(),
                },
                signer_seeds,
            ),
            seized,
        )?;
        msg!("✅ Liquidation complete");

        let clock = Clock::get()?;
        emit!(PositionLiquidated {
            wallet: ctx.accounts.position.wallet,
            liquidator: ctx.accounts.liquidator.key(),
            collateral_seized: seized,
            debt_cleared,
            collateral_ratio: ratio,
            timestamp: clock.unix_timestamp,
        });

        Ok(())
    }
}

#[derive(Accounts)]
pub struct InitializeLedger<'info> {
    #[account(
        init,
        payer = admin,
        space = 8 + LedgerConfig::LEN,
        seeds = [LEDGER_CONFIG_SEED],
        bump
    )]
    pub ledger_config: Account<'info, LedgerConfig>,

    pub collateral_mint: Account<'info, Mint>,

    /// Ledger custody for deposited collateral
    #[account(
        init,
        payer = admin,
        seeds = [COLLATERAL_VAULT_SEED],
        bump,
        token::mint = collateral_mint,
        token::authority = ledger_config
    )]
    pub collateral_vault: Account<'info, TokenAccount>,

    #[account(mut)]
    pub admin: Signer<'info>,

    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct AdminLedgerAction<'info> {
    #[account(mut, seeds = [LEDGER_CONFIG_SEED], bump = ledger_config.bump)]
    pub ledger_config: Account<'info, LedgerConfig>,
    pub admin: Signer<'info>,
}

#[derive(Accounts)]
#[instruction(wallet: Pubkey)]
pub struct DepositCollateral<'info> {
    #[account(seeds = [LEDGER_CONFIG_SEED], bump = ledger_config.bump)]
    pub ledger_config: Account<'info, LedgerConfig>,

    #[account(
        init_if_needed,
        payer = depositor,
        space = 8 + Position::LEN,
        seeds = [POSITION_SEED, wallet.as_ref()],
        bump
    )]
    pub position: Account<'info, Position>,

    #[account(
        mut,
        seeds = [COLLATERAL_VAULT_SEED],
        bump = ledger_config.vault_bump
    )]
    pub collateral_vault: Account<'info, TokenAccount>,

    /// Depositor's token account (source)
    #[account(
        mut,
        constraint = depositor_token.owner == depositor.key() @ PositionError::Unauthorized,
        constraint = depositor_token.mint == ledger_config.collateral_mint @ PositionError::InvalidMint
    )]
    pub depositor_token: Account<'info, TokenAccount>,

    #[account(mut)]
    pub depositor: Signer<'info>,

    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct WithdrawCollateral<'info> {
    #[account(seeds = [LEDGER_CONFIG_SEED], bump = ledger_config.bump)]
    pub ledger_config: Account<'info, LedgerConfig>,

    #[account(
        mut,
        seeds = [POSITION_SEED, position.wallet.as_ref()],
        bump = position.bump,
        constraint = position.wallet == wallet.key() @ PositionError::Unauthorized
    )]
    pub position: Account<'info, Position>,

    #[account(
        mut,
        seeds = [COLLATERAL_VAULT_SEED],
        bump = ledger_config.vault_bump
    )]
    pub collateral_vault: Account<'info, TokenAccount>,

    #[account(
        mut,
        constraint = wallet_token.owner == wallet.key() @ PositionError::Unauthorized,
        constraint = wallet_token.mint == ledger_config.collateral_mint @ PositionError::InvalidMint
    )]
    pub wallet_token: Account<'info, TokenAccount>,

    pub wallet: Signer<'info>,
    pub token_program: Program<'info, Token>,
}

#[derive(Accounts)]
pub struct ReleaseCollateral<'info> {
    #[account(seeds = [LEDGER_CONFIG_SEED], bump = ledger_config.bump)]
    pub ledger_config: Account<'info, LedgerConfig>,

    #[account(
        mut,
        seeds = [POSITION_SEED, position.wallet.as_ref()],
        bump = position.bump
    )]
    pub position: Account<'info, Position>,

    #[account(
        mut,
        seeds = [COLLATERAL_VAULT_SEED],
        bump = ledger_config.vault_bump
    )]
    pub collateral_vault: Account<'info, TokenAccount>,

    /// Released collateral always goes back to the position's wallet
    #[account(
        mut,
        constraint = wallet_token.owner == position.wallet @ PositionError::Unauthorized,
        constraint = wallet_token.mint == ledger_config.collateral_mint @ PositionError::InvalidMint
    )]
    pub wallet_token: Account<'info, TokenAccount>,

    pub token_program: Program<'info, Token>,
}

#[derive(Accounts)]
pub struct UpdateBorrowedAmount<'info> {
    #[account(seeds = [LEDGER_CONFIG_SEED], bump = ledger_config.bump)]
    pub ledger_config: Account<'info, LedgerConfig>,

    #[account(
        init_if_needed,
        payer = payer,
        space = 8 + Position::LEN,
        seeds = [POSITION_SEED, wallet.key().as_ref()],
        bump
    )]
    pub position: Account<'info, Position>,

    /// CHECK: only used as the position key
    pub wallet: UncheckedAccount<'info>,

    /// Pool, loan engine, or ledger admin
    pub authority: Signer<'info>,

    #[account(mut)]
    pub payer: Signer<'info>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct PositionView<'info> {
    #[account(seeds = [POSITION_SEED, position.wallet.as_ref()], bump = position.bump)]
    pub position: Account<'info, Position>,
}

#[derive(Accounts)]
pub struct LiquidatePosition<'info> {
    #[account(seeds = [LEDGER_CONFIG_SEED], bump = ledger_config.bump)]
    pub ledger_config: Account<'info, LedgerConfig>,

    #[account(
        mut,
        seeds = [POSITION_SEED, position.wallet.as_ref()],
        bump = position.bump
    )]
    pub position: Account<'info, Position>,

    #[account(
        mut,
        seeds = [COLLATERAL_VAULT_SEED],
        bump = ledger_config.vault_bump
    )]
    pub collateral_vault: Account<'info, TokenAccount>,

    /// Liquidator's token account (receives the seized collateral)
    #[account(
        mut,
        constraint = liquidator_token.owner == liquidator.key() @ PositionError::Unauthorized,
        constraint = liquidator_token.mint == ledger_config.collateral_mint @ PositionError::InvalidMint
    )]
    pub liquidator_token: Account<'info, TokenAccount>,

    pub liquidator: Signer<'info>,
    pub token_program: Program<'info, Token>,
}

#[account]
pub struct LedgerConfig {
    pub admin: Pubkey,
    pub liquidity_pool: Pubkey,
    pub loan_engine: Pubkey,
    pub collateral_mint: Pubkey,
    pub bump: u8,
    pub vault_bump: u8,
}

impl LedgerConfig {
    pub const LEN: usize = 32 * 4 + 1 + 1;

    pub fn role_of(&self, caller: Pubkey) -> Option<Role> {
        if caller == Pubkey::default() {
            None
        } else if caller == self.admin {
            Some(Role::Admin)
        } else if caller == self.loan_engine {
            Some(Role::LoanEngine)
        } else if caller == self.liquidity_pool {
            Some(Role::Pool)
        } else {
            None
        }
    }

    pub fn authorize(&self, caller: Pubkey, allowed: &[Role]) -> Result<Role> {
        match self.role_of(caller) {
            Some(role) if allowed.contains(&role) => Ok(role),
            _ => err!(PositionError::Unauthorized),
        }
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Pool,
    LoanEngine,
    Admin,
}

#[account]
#[derive(Default)]
pub struct Position {
    pub wallet: Pubkey,
    pub collateral_amount: u64,
    pub borrowed_amount: u64,
    pub bump: u8,
}

impl Position {
    pub const LEN: usize = 32 + 8 + 8 + 1;

    /// `collateral * 10000 / borrowed`, or `INFINITE_RATIO` without debt.
    pub fn collateral_ratio(&self) -> u64 {
        if self.borrowed_amount == 0 {
            return INFINITE_RATIO;
        }
        let ratio = (self.collateral_amount as u128) * (BASIS_POINTS as u128)
            / (self.borrowed_amount as u128);
        u64::try_from(ratio).unwrap_or(INFINITE_RATIO)
    }

    pub fn is_liquidatable(&self) -> bool {
        self.borrowed_amount > 0 && self.collateral_ratio() < LIQUIDATION_THRESHOLD
    }

    // Positions between 15% and 20% are unsafe but not yet liquidatable.
    pub fn is_safe(&self) -> bool {
        self.borrowed_amount == 0 || self.collateral_ratio() >= MIN_COLLATERAL_RATIO
    }

    pub fn max_borrowable(&self) -> Result<u64> {
        self.collateral_amount
            .checked_mul(MAX_LEVERAGE_RATIO)
            .map(|v| v / BASIS_POINTS)
            .ok_or_else(|| error!(PositionError::MathOverflow))
    }

    pub fn health(&self) -> Result<PositionHealth> {
        Ok(PositionHealth {
            collateral_ratio: self.collateral_ratio(),
            liquidatable: self.is_liquidatable(),
            safe: self.is_safe(),
            max_borrowable: self.max_borrowable()?,
        })
    }

    /// Returns the requested ratio in basis points.
    pub fn deposit(&mut self, amount: u64, intended_loan_amount: u64) -> Result<u64> {
        require!(amount > 0, PositionError::InvalidAmount);
        require!(intended_loan_amount > 0, PositionError::InvalidAmount);
        let ratio = requested_collateral_ratio(amount, intended_loan_amount)?;
        require!(
            ratio >= MIN_COLLATERAL_RATIO,
            PositionError::UndercollateralizedRequest
        );
        self.collateral_amount = self
            .collateral_amount
            .checked_add(amount)
            .ok_or(PositionError::MathOverflow)?;
        Ok(ratio)
    }

    pub fn withdraw(&mut self, amount: u64) -> Result<()> {
        require!(amount > 0, PositionError::InvalidAmount);
        require!(
            amount <= self.collateral_amount,
            PositionError::InsufficientCollateral
        );
        require!(self.borrowed_amount == 0, PositionError::ActiveDebt);
        self.collateral_amount -= amount;
        Ok(())
    }

    /// Zeroes the collateral and returns the released balance.
    pub fn release(&mut self) -> Result<u64> {
        require!(self.borrowed_amount == 0, PositionError::ActiveDebt);
        require!(self.collateral_amount > 0, PositionError::NothingToRelease);
        let released = self.collateral_amount;
        self.collateral_amount = 0;
        Ok(released)
    }

    /// Zeroes both collateral and debt and returns the seized collateral.
    pub fn liquidate(&mut self) -> Result<u64> {
        require!(
            self.collateral_amount > 0 && self.borrowed_amount > 0,
            PositionError::NothingToLiquidate
        );
        require!(self.is_liquidatable(), PositionError::NotLiquidatable);
        let seized = self.collateral_amount;
        self.collateral_amount = 0;
        self.borrowed_amount = 0;
        Ok(seized)
    }
}

pub fn requested_collateral_ratio(amount: u64, intended_loan_amount: u64) -> Result<u64> {
    require!(intended_loan_amount > 0, PositionError::InvalidAmount);
    let ratio = (amount as u128) * (BASIS_POINTS as u128) / (intended_loan_amount as u128);
    Ok(u64::try_from(ratio).unwrap_or(INFINITE_RATIO))
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct PositionHealth {
    pub collateral_ratio: u64,
    pub liquidatable: bool,
    pub safe: bool,
    pub max_borrowable: u64,
}

#[event]
pub struct CollateralDeposited {
    pub wallet: Pubkey,
    pub depositor: Pubkey,
    pub amount: u64,
    pub intended_loan_amount: u64,
    pub collateral_amount: u64,
    pub timestamp: i64,
}

#[event]
pub struct CollateralWithdrawn {
    pub wallet: Pubkey,
    pub amount: u64,
    pub remaining_collateral: u64,
    pub timestamp: i64,
}

#[event]
pub struct CollateralReleased {
    pub wallet: Pubkey,
    pub amount: u64,
    pub timestamp: i64,
}

#[event]
pub struct BorrowedAmountUpdated {
    pub wallet: Pubkey,
    pub previous_amount: u64,
    pub new_amount: u64,
    pub role: Role,
    pub timestamp: i64,
}

#[event]
pub struct PositionLiquidated {
    pub wallet: Pubkey,
    pub liquidator: Pubkey,
    pub collateral_seized: u64,
    pub debt_cleared: u64,
    pub collateral_ratio: u64,
    pub timestamp: i64,
}

#[error_code]
pub enum PositionError {
    #[msg("Amount must be greater than zero")]
    InvalidAmount,
    #[msg("Caller is not authorized for this position")]
    Unauthorized,
    #[msg("Withdrawal exceeds deposited collateral")]
    InsufficientCollateral,
    #[msg("Collateral below the 20% minimum for the requested loan")]
    UndercollateralizedRequest,
    #[msg("Position still carries debt")]
    ActiveDebt,
    #[msg("Position is above the liquidation threshold")]
    NotLiquidatable,
    #[msg("Position has no collateral or no debt to liquidate")]
    NothingToLiquidate,
    #[msg("No collateral to release")]
    NothingToRelease,
    #[msg("Token account mint does not match the collateral mint")]
    InvalidMint,
    #[msg("Overflow during math operation")]
    MathOverflow,
}
