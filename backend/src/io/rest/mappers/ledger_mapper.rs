use crate::domain::commands::ledger::{LedgerListResult, ReconciliationReport};
use crate::domain::commands::PaginationInfo as DomainPaginationInfo;
use crate::domain::models::ledger::LedgerEntry as DomainLedgerEntry;
use crate::domain::models::wallet::Wallet;
use shared::{
    LedgerEntry as SharedLedgerEntry, LedgerPageResponse, PaginationInfo as SharedPaginationInfo,
    ReconciliationResponse, WalletResponse,
};

pub struct LedgerMapper;

impl LedgerMapper {
    pub fn to_dto(domain: DomainLedgerEntry) -> SharedLedgerEntry {
        SharedLedgerEntry {
            id: domain.id,
            from: domain.from_owner,
            to: domain.to_owner,
            amount: domain.amount,
            kind: domain.kind.as_str().to_string(),
            created_at: domain.created_at.to_rfc3339(),
            causation_id: domain.causation_id,
            commission_bps: domain.commission_bps,
        }
    }

    pub fn to_page_response(result: LedgerListResult) -> LedgerPageResponse {
        LedgerPageResponse {
            entries: result.entries.into_iter().map(Self::to_dto).collect(),
            pagination: Self::to_pagination_dto(result.pagination),
        }
    }

    pub fn to_pagination_dto(pagination: DomainPaginationInfo) -> SharedPaginationInfo {
        SharedPaginationInfo {
            has_more: pagination.has_more,
            next_cursor: pagination.next_cursor,
        }
    }

    pub fn to_wallet_response(wallet: Wallet) -> WalletResponse {
        WalletResponse {
            owner_id: wallet.owner_id,
            balance: wallet.balance,
        }
    }

    pub fn to_reconciliation_response(report: ReconciliationReport) -> ReconciliationResponse {
        ReconciliationResponse {
            owner_id: report.owner_id,
            opening_balance: report.opening_balance,
            ledger_net: report.ledger_net,
            balance: report.balance,
            balanced: report.balanced,
        }
    }
}
