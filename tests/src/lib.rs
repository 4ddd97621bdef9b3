//! Shared fixtures for the lending programs' test suites: a simulated asset
//! ledger for state-level scenarios, account serialization helpers and the
//! processors that let `solana-program-test` run the programs in-process.

use std::collections::HashMap;

use anchor_lang::prelude::{AccountSerialize, Pubkey};
use anchor_spl::token::spl_token;
use anchor_spl::token::spl_token::state::{Account as TokenAccount, Mint};
use solana_program::account_info::AccountInfo;
use solana_program::entrypoint::ProgramResult;
use solana_program::rent::Rent;
use solana_program_option::COption;
use solana_program_pack::Pack;
use solana_sdk::account::Account;
use thiserror::Error;

/// 6-decimal USDC units.
pub const USDC: u64 = 1_000_000;

pub const SECONDS_PER_DAY: i64 = 86_400;

pub fn usdc(whole: u64) -> u64 {
    whole * USDC
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: u64, required: u64 },
    #[error("insufficient allowance: available {available}, required {required}")]
    InsufficientAllowance { available: u64, required: u64 },
    #[error("balance overflow")]
    Overflow,
}

/// In-memory fungible asset with SPL-style transfer and delegation semantics.
#[derive(Debug, Default, Clone)]
pub struct AssetLedger {
    balances: HashMap<Pubkey, u64>,
    allowances: HashMap<(Pubkey, Pubkey), u64>,
}

impl AssetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint_to(&mut self, owner: Pubkey, amount: u64) -> Result<(), AssetError> {
        let balance = self.balances.entry(owner).or_default();
        *balance = balance.checked_add(amount).ok_or(AssetError::Overflow)?;
        Ok(())
    }

    pub fn balance_of(&self, owner: &Pubkey) -> u64 {
        self.balances.get(owner).copied().unwrap_or_default()
    }

    pub fn total_supply(&self) -> u64 {
        self.balances.values().sum()
    }

    pub fn transfer(&mut self, from: Pubkey, to: Pubkey, amount: u64) -> Result<(), AssetError> {
        let available = self.balance_of(&from);
        if available < amount {
            return Err(AssetError::InsufficientBalance {
                available,
                required: amount,
            });
        }
        let credited = self
            .balance_of(&to)
            .checked_add(amount)
            .ok_or(AssetError::Overflow)?;
        self.balances.insert(from, available - amount);
        self.balances.insert(to, credited);
        Ok(())
    }

    pub fn approve(&mut self, owner: Pubkey, spender: Pubkey, amount: u64) {
        self.allowances.insert((owner, spender), amount);
    }

    pub fn allowance(&self, owner: &Pubkey, spender: &Pubkey) -> u64 {
        self.allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn transfer_from(
        &mut self,
        spender: Pubkey,
        from: Pubkey,
        to: Pubkey,
        amount: u64,
    ) -> Result<(), AssetError> {
        let allowed = self.allowance(&from, &spender);
        if allowed < amount {
            return Err(AssetError::InsufficientAllowance {
                available: allowed,
                required: amount,
            });
        }
        self.transfer(from, to, amount)?;
        self.allowances.insert((from, spender), allowed - amount);
        Ok(())
    }
}

/// Error code carried by an Anchor error, if it is one.
pub fn anchor_error_code(err: &anchor_lang::error::Error) -> Option<u32> {
    match err {
        anchor_lang::error::Error::AnchorError(e) => Some(e.error_code_number),
        anchor_lang::error::Error::ProgramError(_) => None,
    }
}

pub fn assert_anchor_error<T: std::fmt::Debug>(result: anchor_lang::Result<T>, expected: u32) {
    let err = result.expect_err("expected an error");
    assert_eq!(anchor_error_code(&err), Some(expected), "unexpected error: {err:?}");
}

pub fn serialize_anchor_account<T: AccountSerialize>(data: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    data.try_serialize(&mut buf).expect("serialize account");
    buf
}

/// Serialized Anchor account padded to its allocated size.
pub fn anchor_account_data<T: AccountSerialize>(data: &T, space: usize) -> Vec<u8> {
    let mut buf = serialize_anchor_account(data);
    if buf.len() < space {
        buf.resize(space, 0);
    }
    buf
}

/// Rent-exempt account owned by `owner`.
pub fn program_account(owner: Pubkey, data: Vec<u8>) -> Account {
    Account {
        lamports: Rent::default().minimum_balance(data.len()),
        data,
        owner,
        executable: false,
        rent_epoch: 0,
    }
}

pub fn token_account_data(mint: Pubkey, owner: Pubkey, amount: u64) -> Vec<u8> {
    let token_account = TokenAccount {
        mint,
        owner,
        amount,
        delegate: COption::None,
        state: spl_token::state::AccountState::Initialized,
        is_native: COption::None,
        delegated_amount: 0,
        close_authority: COption::None,
    };
    let mut data = vec![0u8; TokenAccount::LEN];
    TokenAccount::pack(token_account, &mut data).expect("pack token account");
    data
}

pub fn mint_data(mint_authority: Pubkey) -> Vec<u8> {
    let mint = Mint {
        mint_authority: COption::Some(mint_authority),
        supply: 0,
        decimals: 6,
        is_initialized: true,
        freeze_authority: COption::None,
    };
    let mut data = vec![0u8; Mint::LEN];
    Mint::pack(mint, &mut data).expect("pack mint");
    data
}

pub fn token_account(mint: Pubkey, owner: Pubkey, amount: u64) -> Account {
    program_account(spl_token::id(), token_account_data(mint, owner, amount))
}

pub fn mint_account(mint_authority: Pubkey) -> Account {
    program_account(spl_token::id(), mint_data(mint_authority))
}

pub fn position_ledger_processor<'a, 'b, 'c, 'd>(
    program_id: &'a Pubkey,
    accounts: &'b [AccountInfo<'c>],
    data: &'d [u8],
) -> ProgramResult {
    let accounts: &[AccountInfo<'_>] = unsafe { std::mem::transmute(accounts) };
    position_ledger::entry(program_id, accounts, data)
}

pub fn liquidity_pool_processor<'a, 'b, 'c, 'd>(
    program_id: &'a Pubkey,
    accounts: &'b [AccountInfo<'c>],
    data: &'d [u8],
) -> ProgramResult {
    let accounts: &[AccountInfo<'_>] = unsafe { std::mem::transmute(accounts) };
    liquidity_pool::entry(program_id, accounts, data)
}

pub fn loan_engine_processor<'a, 'b, 'c, 'd>(
    program_id: &'a Pubkey,
    accounts: &'b [AccountInfo<'c>],
    data: &'d [u8],
) -> ProgramResult {
    let accounts: &[AccountInfo<'_>] = unsafe { std::mem::transmute(accounts) };
    loan_engine::entry(program_id, accounts, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_moves_balance() {
        let (alice, bob) = (Pubkey::new_unique(), Pubkey::new_unique());
        let mut ledger = AssetLedger::new();
        ledger.mint_to(alice, usdc(100)).unwrap();

        ledger.transfer(alice, bob, usdc(40)).unwrap();
        assert_eq!(ledger.balance_of(&alice), usdc(60));
        assert_eq!(ledger.balance_of(&bob), usdc(40));
        assert_eq!(ledger.total_supply(), usdc(100));
    }

    #[test]
    fn transfer_rejects_overdraft() {
        let (alice, bob) = (Pubkey::new_unique(), Pubkey::new_unique());
        let mut ledger = AssetLedger::new();
        ledger.mint_to(alice, 5).unwrap();

        let err = ledger.transfer(alice, bob, 6).unwrap_err();
        assert_eq!(
            err,
            AssetError::InsufficientBalance {
                available: 5,
                required: 6
            }
        );
        assert_eq!(ledger.balance_of(&alice), 5);
    }

    #[test]
    fn transfer_from_consumes_allowance() {
        let (owner, spender, to) = (
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
        );
        let mut ledger = AssetLedger::new();
        ledger.mint_to(owner, 1_000).unwrap();
        ledger.approve(owner, spender, 600);

        ledger.transfer_from(spender, owner, to, 400).unwrap();
        assert_eq!(ledger.allowance(&owner, &spender), 200);
        assert_eq!(ledger.balance_of(&to), 400);

        let err = ledger.transfer_from(spender, owner, to, 300).unwrap_err();
        assert_eq!(
            err,
            AssetError::InsufficientAllowance {
                available: 200,
                required: 300
            }
        );
    }
}
