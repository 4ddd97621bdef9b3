#![allow(dead_code)]

use anchor_lang::prelude::{AccountDeserialize, Pubkey};
use solana_program_test::{BanksClient, BanksClientError, ProgramTestContext};
use solana_sdk::instruction::{Instruction, InstructionError};
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::system_instruction;
use solana_sdk::transaction::{Transaction, TransactionError};

pub async fn fund_signer(context: &mut ProgramTestContext, signer: &Keypair) {
    let fund_ix = system_instruction::transfer(
        &context.payer.pubkey(),
        &signer.pubkey(),
        1_000_000_000,
    );
    let fund_tx = Transaction::new_signed_with_payer(
        &[fund_ix],
        Some(&context.payer.pubkey()),
        &[&context.payer],
        context.last_blockhash,
    );
    context
        .banks_client
        .process_transaction(fund_tx)
        .await
        .expect("fund signer");
}

/// Signs with `signers[0]` as fee payer.
pub async fn send(
    context: &mut ProgramTestContext,
    ix: Instruction,
    signers: &[&Keypair],
) -> Result<(), BanksClientError> {
    let blockhash = context
        .banks_client
        .get_latest_blockhash()
        .await
        .expect("blockhash");
    let tx = Transaction::new_signed_with_payer(
        &[ix],
        Some(&signers[0].pubkey()),
        signers,
        blockhash,
    );
    context.banks_client.process_transaction(tx).await
}

pub fn assert_custom_error(result: Result<(), BanksClientError>, expected: u32) {
    let err = result.expect_err("transaction should fail");
    match err {
        BanksClientError::TransactionError(TransactionError::InstructionError(
            _,
            InstructionError::Custom(code),
        )) => {
            assert_eq!(code, expected, "unexpected error code");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

pub async fn fetch_anchor_account<T: AccountDeserialize>(
    banks_client: &mut BanksClient,
    address: Pubkey,
) -> T {
    let account = banks_client
        .get_account(address)
        .await
        .expect("get account")
        .expect("account missing");
    let mut data: &[u8] = &account.data;
    T::try_deserialize(&mut data).expect("deserialize account")
}

pub async fn token_balance(banks_client: &mut BanksClient, address: Pubkey) -> u64 {
    use anchor_spl::token::spl_token::state::Account as TokenAccount;
    use solana_program_pack::Pack;

    let account = banks_client
        .get_account(address)
        .await
        .expect("get token account")
        .expect("token account missing");
    TokenAccount::unpack(&account.data)
        .expect("unpack token account")
        .amount
}
