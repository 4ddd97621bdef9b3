use anchor_lang::prelude::*;
use anchor_spl::token::{self, Mint, Token, TokenAccount, Transfer};

declare_id!("LqPo111111111111111111111111111111111111111");

pub const POOL_SEED: &[u8] = b"pool";
pub const POOL_VAULT_SEED: &[u8] = b"pool_vault";
pub const ALLOCATION_SEED: &[u8] = b"allocation";
pub const LP_POSITION_SEED: &[u8] = b"lp";

/// Share price reported for an empty pool (1 USDC)
pub const BASE_SHARE_PRICE: u64 = 1_000_000;

#[program]
pub mod liquidity_pool {
    use super::*;

    pub fn initialize_pool(ctx: Context<InitializePool>, loan_engine: Pubkey) -> Result<()> {
        let pool = &mut ctx.accounts.pool;
        pool.authority = ctx.accounts.authority.key();
        pool.loan_engine = loan_engine;
        pool.asset_mint = ctx.accounts.asset_mint.key();
        pool.total_shares = 0;
        pool.total_assets = 0;
        pool.total_allocated = 0;
        pool.bump = ctx.bumps.pool;
        pool.vault_bump = ctx.bumps.pool_vault;
        msg!("✅ Liquidity pool initialized, allocator: {}", loan_engine);
        Ok(())
    }

    pub fn set_loan_engine(ctx: Context<ManagePool>, loan_engine: Pubkey) -> Result<()> {
        let pool = &mut ctx.accounts.pool;
        pool.assert_authority(ctx.accounts.authority.key())?;
        pool.loan_engine = loan_engine;
        msg!("✅ Allocator updated to: {}", loan_engine);
        Ok(())
    }

    pub fn deposit(ctx: Context<Deposit>, amount: u64) -> Result<()> {
        let pool = &mut ctx.accounts.pool;
        let shares = pool.deposit(amount)?;

        let lp_position = &mut ctx.accounts.lp_position;
        lp_position.owner = ctx.accounts.depositor.key();
        lp_position.shares = lp_position
            .shares
            .checked_add(shares)
            .ok_or(PoolError::MathOverflow)?;

        token::transfer(
            CpiContext::new(
                ctx.accounts.token_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.depositor_token.to_account_info(),
                    to: ctx.accounts.pool_vault.to_account_info(),
                    authority: ctx.accounts.depositor.to_account_info(),
                },
            ),
            amount,
        )?;
        msg!("Deposited {} for {} shares", amount, shares);

        let clock = Clock::get()?;
        emit!(LiquidityDeposited {
            depositor: ctx.accounts.depositor.key(),
            amount,
            shares,
            total_assets: ctx.accounts.pool.total_assets,
            timestamp: clock.unix_timestamp,
        });

        Ok(())
    }

    pub fn withdraw(ctx: Context<Withdraw>, shares: u64) -> Result<()> {
        require!(
            shares <= ctx.accounts.lp_position.shares,
            PoolError::InsufficientShares
        );
        let amount = ctx.accounts.pool.withdraw(shares)?;
        ctx.accounts.lp_position.shares -= shares;

        let bump = ctx.accounts.pool.bump;
        let seeds = &[POOL_SEED, &[bump]];
        let signer_seeds = &[&seeds[..]];

        token::transfer(
            CpiContext::new_with_signer(
                ctx.accounts.token_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.pool_vault.to_account_info(),
                    to: ctx.accounts.depositor_token.to_account_info(),
                    authority: ctx.accounts.pool.to_account_info(),
                },
                signer_seeds,
            ),
            amount,
        )?;
        msg!("Redeemed {} shares for {}", shares, amount);

        let clock = Clock::get()?;
        emit!(LiquidityWithdrawn {
            depositor: ctx.accounts.depositor.key(),
            amount,
            shares,
            total_assets: ctx.accounts.pool.total_assets,
            timestamp: clock.unix_timestamp,
        });

        Ok(())
    }

    /// Disburses pool liquidity into a borrower's execution wallet.
    /// Only the configured loan engine may allocate.
    pub fn allocate(ctx: Context<Allocate>, amount: u64) -> Result<()> {
        let pool = &mut ctx.accounts.pool;
        pool.assert_loan_engine(ctx.accounts.loan_engine.key())?;

        let allocation = &mut ctx.accounts.allocation;
        if allocation.wallet == Pubkey::default() {
            allocation.wallet = ctx.accounts.wallet.key();
        }
        pool.allocate(allocation, amount, ctx.accounts.pool_vault.amount)?;

        // STEP 1: Move funds from pool custody into the wallet
        msg!("Allocating {} to wallet {}", amount, ctx.accounts.wallet.key());

        let bump = pool.bump;
        let seeds = &[POOL_SEED, &[bump]];
        let signer_seeds = &[&seeds[..]];

        token::transfer(
            CpiContext::new_with_signer(
                ctx.accounts.token_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.pool_vault.to_account_info(),
                    to: ctx.accounts.wallet_token.to_account_info(),
                    authority: ctx.accounts.pool.to_account_info(),
                },
                signer_seeds,
            ),
            amount,
        )?;
        msg!("✅ Allocation transferred");
        msg!(
            "  Pool assets: {}, allocated: {}",
            ctx.accounts.pool.total_assets,
            ctx.accounts.pool.total_allocated
        );

        let clock = Clock::get()?;
        emit!(FundsAllocated {
            wallet: ctx.accounts.wallet.key(),
            amount,
            wallet_allocation: ctx.accounts.allocation.amount,
            total_assets: ctx.accounts.pool.total_assets,
            total_allocated: ctx.accounts.pool.total_allocated,
            timestamp: clock.unix_timestamp,
        });

        Ok(())
    }

    /// Anyone may repay on behalf of a wallet. Amounts above the outstanding
    /// allocation stay in the pool as yield.
    pub fn repay(ctx: Context<Repay>, wallet: Pubkey, amount: u64) -> Result<()> {
        let allocation = &mut ctx.accounts.allocation;
        if allocation.wallet == Pubkey::default() {
            allocation.wallet = wallet;
        }
        let principal = ctx.accounts.pool.repay(allocation, amount)?;

        token::transfer(
            CpiContext::new(
                ctx.accounts.token_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.payer_token.to_account_info(),
                    to: ctx.accounts.pool_vault.to_account_info(),
                    authority: ctx.accounts.payer.to_account_info(),
                },
            ),
            amount,
        )?;
        msg!(
            "Repaid {} for wallet {} ({} principal, {} yield)",
            amount,
            wallet,
            principal,
            amount - principal
        );

        let clock = Clock::get()?;
        emit!(FundsRepaid {
            wallet,
            payer: ctx.accounts.payer.key(),
            amount,
            principal_reduction: principal,
            wallet_allocation: ctx.accounts.allocation.amount,
            total_assets: ctx.accounts.pool.total_assets,
            timestamp: clock.unix_timestamp,
        });

        Ok(())
    }

    /// Drops a defaulted wallet's outstanding allocation. The pool absorbs the loss.
    pub fn write_off(ctx: Context<WriteOff>) -> Result<()> {
        let pool = &mut ctx.accounts.pool;
        pool.assert_loan_engine(ctx.accounts.loan_engine.key())?;
        let written_off = pool.write_off(&mut ctx.accounts.allocation)?;
        msg!("⚠️  Wrote off {} allocated to {}", written_off, ctx.accounts.allocation.wallet);

        let clock = Clock::get()?;
        emit!(AllocationWrittenOff {
            wallet: ctx.accounts.allocation.wallet,
            amount: written_off,
            total_allocated: ctx.accounts.pool.total_allocated,
            timestamp: clock.unix_timestamp,
        });

        Ok(())
    }

    pub fn available_liquidity(ctx: Context<PoolView>) -> Result<u64> {
        let available = ctx.accounts.pool.available_liquidity();
        msg!("Available liquidity: {}", available);
        Ok(available)
    }
}

#[derive(Accounts)]
pub struct InitializePool<'info> {
    #[account(
        init,
        seeds = [POOL_SEED],
        bump,
        payer = authority,
        space = 8 + PoolState::LEN
    )]
    pub pool: Account<'info, PoolState>,

    pub asset_mint: Account<'info, Mint>,

    /// Pool custody for deposited liquidity
    #[account(
        init,
        payer = authority,
        seeds = [POOL_VAULT_SEED],
        bump,
        token::mint = asset_mint,
        token::authority = pool
    )]
    pub pool_vault: Account<'info, TokenAccount>,

    #[account(mut)]
    pub authority: Signer<'info>,
    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct ManagePool<'info> {
    #[account(mut, seeds = [POOL_SEED], bump = pool.bump)]
    pub pool: Account<'info, PoolState>,
    pub authority: Signer<'info>,
}

#[derive(Accounts)]
pub struct Deposit<'info> {
    #[account(mut, seeds = [POOL_SEED], bump = pool.bump)]
    pub pool: Account<'info, PoolState>,

    #[account(mut, seeds = [POOL_VAULT_SEED], bump = pool.vault_bump)]
    pub pool_vault: Account<'info, TokenAccount>,

    #[account(
        init_if_needed,
        payer = depositor,
        space = 8 + LpPosition::LEN,
        seeds = [LP_POSITION_SEED, depositor.key().as_ref()],
        bump
    )]
    pub lp_position: Account<'info, LpPosition>,

    #[account(
        mut,
        constraint = depositor_token.owner == depositor.key() @ PoolError::Unauthorized,
        constraint = depositor_token.mint == pool.asset_mint @ PoolError::InvalidMint
    )]
    pub depositor_token: Account<'info, TokenAccount>,

    #[account(mut)]
    pub depositor: Signer<'info>,
    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct Withdraw<'info> {
    #[account(mut, seeds = [POOL_SEED], bump = pool.bump)]
    pub pool: Account<'info, PoolState>,

    #[account(mut, seeds = [POOL_VAULT_SEED], bump = pool.vault_bump)]
    pub pool_vault: Account<'info, TokenAccount>,

    #[account(
        mut,
        seeds = [LP_POSITION_SEED, depositor.key().as_ref()],
        bump
    )]
    pub lp_position: Account<'info, LpPosition>,

    #[account(
        mut,
        constraint = depositor_token.owner == depositor.key() @ PoolError::Unauthorized,
        constraint = depositor_token.mint == pool.asset_mint @ PoolError::InvalidMint
    )]
    pub depositor_token: Account<'info, TokenAccount>,

    pub depositor: Signer<'info>,
    pub token_program: Program<'info, Token>,
}

#[derive(Accounts)]
pub struct Allocate<'info> {
    #[account(mut, seeds = [POOL_SEED], bump = pool.bump)]
    pub pool: Account<'info, PoolState>,

    /// Pool custody (source)
    #[account(mut, seeds = [POOL_VAULT_SEED], bump = pool.vault_bump)]
    pub pool_vault: Account<'info, TokenAccount>,

    #[account(
        init_if_needed,
        payer = payer,
        space = 8 + Allocation::LEN,
        seeds = [ALLOCATION_SEED, wallet.key().as_ref()],
        bump
    )]
    pub allocation: Account<'info, Allocation>,

    /// CHECK: execution wallet identity; funds land in `wallet_token`
    pub wallet: UncheckedAccount<'info>,

    /// Wallet's token account (destination)
    #[account(
        mut,
        constraint = wallet_token.owner == wallet.key() @ PoolError::Unauthorized,
        constraint = wallet_token.mint == pool.asset_mint @ PoolError::InvalidMint
    )]
    pub wallet_token: Account<'info, TokenAccount>,

    pub loan_engine: Signer<'info>,

    #[account(mut)]
    pub payer: Signer<'info>,

    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(wallet: Pubkey)]
pub struct Repay<'info> {
    #[account(mut, seeds = [POOL_SEED], bump = pool.bump)]
    pub pool: Account<'info, PoolState>,

    /// Pool custody (destination)
    #[account(mut, seeds = [POOL_VAULT_SEED], bump = pool.vault_bump)]
    pub pool_vault: Account<'info, TokenAccount>,

    #[account(
        init_if_needed,
        payer = payer,
        space = 8 + Allocation::LEN,
        seeds = [ALLOCATION_SEED, wallet.as_ref()],
        bump
    )]
    pub allocation: Account<'info, Allocation>,

    #[account(
        mut,
        constraint = payer_token.owner == payer.key() @ PoolError::Unauthorized,
        constraint = payer_token.mint == pool.asset_mint @ PoolError::InvalidMint
    )]
    pub payer_token: Account<'info, TokenAccount>,

    #[account(mut)]
    pub payer: Signer<'info>,

    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct WriteOff<'info> {
    #[account(mut, seeds = [POOL_SEED], bump = pool.bump)]
    pub pool: Account<'info, PoolState>,

    #[account(
        mut,
        seeds = [ALLOCATION_SEED, allocation.wallet.as_ref()],
        bump
    )]
    pub allocation: Account<'info, Allocation>,

    pub loan_engine: Signer<'info>,
}

#[derive(Accounts)]
pub struct PoolView<'info> {
    #[account(seeds = [POOL_SEED], bump = pool.bump)]
    pub pool: Account<'info, PoolState>,
}

#[account]
#[derive(Default)]
pub struct PoolState {
    pub authority: Pubkey,
    pub loan_engine: Pubkey,
    pub asset_mint: Pubkey,
    pub total_shares: u64,
    pub total_assets: u64,
    pub total_allocated: u64,
    pub bump: u8,
    pub vault_bump: u8,
}

impl PoolState {
    pub const LEN: usize = 32 * 3 + 8 * 3 + 1 + 1;

    pub fn assert_authority(&self, authority: Pubkey) -> Result<()> {
        require_keys_eq!(authority, self.authority, PoolError::Unauthorized);
        Ok(())
    }

    pub fn assert_loan_engine(&self, caller: Pubkey) -> Result<()> {
        require_keys_eq!(caller, self.loan_engine, PoolError::Unauthorized);
        Ok(())
    }

    /// Unallocated liquidity available to new loans.
    pub fn available_liquidity(&self) -> u64 {
        self.total_assets.saturating_sub(self.total_allocated)
    }

    /// Pool value backing LP shares, excluding accrued-but-unrealized yield.
    pub fn pool_value(&self) -> Result<u64> {
        self.total_assets
            .checked_add(self.total_allocated)
            .ok_or_else(|| error!(PoolError::MathOverflow))
    }

    pub fn share_price(&self) -> u64 {
        if self.total_shares == 0 {
            BASE_SHARE_PRICE
        } else {
            let value = self.pool_value().unwrap_or(u64::MAX) as u128;
            let price = value * BASE_SHARE_PRICE as u128 / self.total_shares as u128;
            u64::try_from(price).unwrap_or(u64::MAX)
        }
    }

    /// Credits a deposit and returns the shares minted for it.
    pub fn deposit(&mut self, amount: u64) -> Result<u64> {
        require!(amount > 0, PoolError::InvalidAmount);
        let pre_price = self.share_price();
        let pool_value = self.pool_value()?;
        let shares = if self.total_shares == 0 || pool_value == 0 {
            amount
        } else {
            let minted = (amount as u128) * (self.total_shares as u128) / (pool_value as u128);
            u64::try_from(minted).map_err(|_| error!(PoolError::MathOverflow))?
        };
        require!(shares > 0, PoolError::InvalidAmount);
        self.total_shares = self
            .total_shares
            .checked_add(shares)
            .ok_or(PoolError::MathOverflow)?;
        self.total_assets = self
            .total_assets
            .checked_add(amount)
            .ok_or(PoolError::MathOverflow)?;
        require!(
            self.share_price() >= pre_price,
            PoolError::SharePriceRegression
        );
        Ok(shares)
    }

    pub fn redeem_amount(&self, shares: u64) -> Result<u64> {
        require!(self.total_shares > 0, PoolError::NoShares);
        let amount = (self.pool_value()? as u128) * (shares as u128) / (self.total_shares as u128);
        u64::try_from(amount).map_err(|_| error!(PoolError::MathOverflow))
    }

    /// Burns shares and returns the amount to pay out of custody.
    pub fn withdraw(&mut self, shares: u64) -> Result<u64> {
        require!(shares > 0, PoolError::InvalidAmount);
        require!(shares <= self.total_shares, PoolError::InsufficientShares);
        let amount = self.redeem_amount(shares)?;
        require!(
            amount <= self.total_assets,
            PoolError::InsufficientLiquidity
        );
        self.total_shares -= shares;
        self.total_assets -= amount;
        Ok(amount)
    }

    pub fn allocate(
        &mut self,
        allocation: &mut Allocation,
        amount: u64,
        custody_balance: u64,
    ) -> Result<()> {
        require!(amount > 0, PoolError::InvalidAmount);
        require!(
            amount <= self.available_liquidity(),
            PoolError::InsufficientLiquidity
        );
        require!(amount <= custody_balance, PoolError::InsufficientLiquidity);

        allocation.amount = allocation
            .amount
            .checked_add(amount)
            .ok_or(PoolError::MathOverflow)?;
        self.total_allocated = self
            .total_allocated
            .checked_add(amount)
            .ok_or(PoolError::MathOverflow)?;
        self.total_assets -= amount;
        Ok(())
    }

    /// Returns the part of `amount` that reduced the outstanding allocation.
    pub fn repay(&mut self, allocation: &mut Allocation, amount: u64) -> Result<u64> {
        require!(amount > 0, PoolError::InvalidAmount);
        let principal = amount.min(allocation.amount);
        allocation.amount -= principal;
        self.total_allocated = self
            .total_allocated
            .checked_sub(principal)
            .ok_or(PoolError::MathOverflow)?;
        self.total_assets = self
            .total_assets
            .checked_add(amount)
            .ok_or(PoolError::MathOverflow)?;
        Ok(principal)
    }

    pub fn write_off(&mut self, allocation: &mut Allocation) -> Result<u64> {
        let outstanding = allocation.amount;
        allocation.amount = 0;
        self.total_allocated = self
            .total_allocated
            .checked_sub(outstanding)
            .ok_or(PoolError::MathOverflow)?;
        Ok(outstanding)
    }
}

#[account]
#[derive(Default)]
pub struct Allocation {
    pub wallet: Pubkey,
    pub amount: u64,
}

impl Allocation {
    pub const LEN: usize = 32 + 8;
}

#[account]
#[derive(Default)]
pub struct LpPosition {
    pub owner: Pubkey,
    pub shares: u64,
}

impl LpPosition {
    pub const LEN: usize = 32 + 8;
}

#[event]
pub struct LiquidityDeposited {
    pub depositor: Pubkey,
    pub amount: u64,
    pub shares: u64,
    pub total_assets: u64,
    pub timestamp: i64,
}

#[event]
pub struct LiquidityWithdrawn {
    pub depositor: Pubkey,
    pub amount: u64,
    pub shares: u64,
    pub total_assets: u64,
    pub timestamp: i64,
}

#[event]
pub struct FundsAllocated {
    pub wallet: Pubkey,
    pub amount: u64,
    pub wallet_allocation: u64,
    pub total_assets: u64,
    pub total_allocated: u64,
    pub timestamp: i64,
}

#[event]
pub struct FundsRepaid {
    pub wallet: Pubkey,
    pub payer: Pubkey,
    pub amount: u64,
    pub principal_reduction: u64,
    pub wallet_allocation: u64,
    pub total_assets: u64,
    pub timestamp: i64,
}

#[event]
pub struct AllocationWrittenOff {
    pub wallet: Pubkey,
    pub amount: u64,
    pub total_allocated: u64,
    pub timestamp: i64,
}

#[error_code]
pub enum PoolError {
    #[msg("Zero amount not allowed")]
    InvalidAmount,
    #[msg("Insufficient shares")]
    InsufficientShares,
    #[msg("Insufficient liquidity")]
    InsufficientLiquidity,
    #[msg("Math overflow")]
    MathOverflow,
    #[msg("No shares exist")]
    NoShares,
    #[msg("Share price regression detected")]
    SharePriceRegression,
    #[msg("Unauthorized authority")]
    Unauthorized,
    #[msg("Token account mint does not match the pool asset")]
    InvalidMint,
}
