//! Behaviour every `Store` backend must share. Each backend's test module
//! runs these against a fresh store.

#![allow(clippy::missing_panics_doc)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clipledger_core::{Job, JobStatus, PaymentTransaction, Quality, RedemptionCode, UserId};

use crate::{
    ClaimOutcome, CodeFilter, CodeState, DebitOutcome, JobCounts, SettleOutcome, Store, StoreError,
};

fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

fn job_for(owner: &UserId, quality: Quality) -> Job {
    Job::new(owner.clone(), format!("uploads/{owner}/abc/clip.mp4"), quality)
}

pub async fn accounts(store: &dyn Store) {
    let alice = user("alice");

    let first = store.ensure_account(&alice, 3).await.unwrap();
    assert_eq!(first.balance, 3);

    // A second ensure never resets the balance.
    store.credit(&alice, 5).await.unwrap();
    let again = store.ensure_account(&alice, 3).await.unwrap();
    assert_eq!(again.balance, 8);

    assert_eq!(
        store.debit(&alice, 8).await.unwrap(),
        DebitOutcome::Debited { balance: 0 }
    );
    assert_eq!(
        store.debit(&alice, 1).await.unwrap(),
        DebitOutcome::Insufficient { balance: 0 }
    );

    store.set_payment_customer(&alice, "cus_123").await.unwrap();
    let account = store.get_account(&alice).await.unwrap().unwrap();
    assert_eq!(account.payment_customer_id.as_deref(), Some("cus_123"));

    assert!(store.get_account(&user("nobody")).await.unwrap().is_none());
    assert!(store.debit(&user("nobody"), 1).await.is_err());

    store.ensure_account(&user("bob"), 3).await.unwrap();
    let page = store.list_accounts(10, 0).await.unwrap();
    assert_eq!(page.total, 2);
}

pub async fn job_reservation(store: &dyn Store) {
    let alice = user("alice");
    store.ensure_account(&alice, 3).await.unwrap();

    let job = job_for(&alice, Quality::E2fgviHq);
    assert_eq!(
        store.create_job(&job).await.unwrap(),
        DebitOutcome::Debited { balance: 1 }
    );
    let stored = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.cost, 2);

    // Not enough left for a second hq job: nothing stored, balance intact.
    let refused = job_for(&alice, Quality::E2fgviHq);
    assert_eq!(
        store.create_job(&refused).await.unwrap(),
        DebitOutcome::Insufficient { balance: 1 }
    );
    assert!(store.get_job(&refused.id).await.unwrap().is_none());
    assert_eq!(store.get_account(&alice).await.unwrap().unwrap().balance, 1);

    tokio::time::sleep(Duration::from_millis(2)).await;
    let newer = job_for(&alice, Quality::Lama);
    store.create_job(&newer).await.unwrap();

    let listed = store.list_jobs_by_user(&alice, 10, 0).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, newer.id);
    assert_eq!(listed[1].id, job.id);
}

pub async fn job_transitions(store: &dyn Store) {
    let alice = user("alice");
    store.ensure_account(&alice, 3).await.unwrap();

    let job = job_for(&alice, Quality::Lama);
    store.create_job(&job).await.unwrap();

    assert!(store.mark_dispatched(&job.id, "run-1").await.unwrap());
    assert!(!store.mark_dispatched(&job.id, "run-2").await.unwrap());
    let processing = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(processing.status, JobStatus::Processing);
    assert_eq!(processing.dispatch_handle.as_deref(), Some("run-1"));

    assert!(store.complete_job(&job.id).await.unwrap());
    assert!(!store.complete_job(&job.id).await.unwrap());
    assert_eq!(
        store
            .fail_job(&job.id, &JobStatus::ACTIVE, "late failure")
            .await
            .unwrap(),
        None
    );
    assert_eq!(store.get_account(&alice).await.unwrap().unwrap().balance, 2);

    // Failure refunds exactly once.
    let doomed = job_for(&alice, Quality::Lama);
    store.create_job(&doomed).await.unwrap();
    assert_eq!(
        store
            .fail_job(&doomed.id, &JobStatus::ACTIVE, "rejected")
            .await
            .unwrap(),
        Some(2)
    );
    assert_eq!(
        store
            .fail_job(&doomed.id, &JobStatus::ACTIVE, "rejected again")
            .await
            .unwrap(),
        None
    );
    let failed = store.get_job(&doomed.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("rejected"));
    assert!(!store.complete_job(&doomed.id).await.unwrap());

    // A guarded fail restricted to `pending` leaves a processing job alone.
    let running = job_for(&alice, Quality::Lama);
    store.create_job(&running).await.unwrap();
    store.mark_dispatched(&running.id, "run-3").await.unwrap();
    assert_eq!(
        store
            .fail_job(&running.id, &[JobStatus::Pending], "exhausted")
            .await
            .unwrap(),
        None
    );

    let page = store
        .list_jobs(Some(JobStatus::Completed), 10, 0)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, job.id);
    assert_eq!(store.list_jobs(None, 10, 0).await.unwrap().total, 3);
}

pub async fn dispatch_claims(store: &dyn Store) {
    let alice = user("alice");
    store.ensure_account(&alice, 3).await.unwrap();
    let job = job_for(&alice, Quality::Lama);
    store.create_job(&job).await.unwrap();

    assert!(store.claim_dispatch_attempt(&job.id, 0).await.unwrap());
    // Same observed counter: the claim was already taken.
    assert!(!store.claim_dispatch_attempt(&job.id, 0).await.unwrap());
    assert!(store.record_dispatch_error(&job.id, "timeout").await.unwrap());

    let pending = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(pending.dispatch_attempts, 1);
    assert_eq!(pending.last_dispatch_error.as_deref(), Some("timeout"));

    let stale = store
        .list_stale_jobs(JobStatus::Pending, Utc::now() + chrono::Duration::seconds(1), 10)
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    let fresh = store
        .list_stale_jobs(JobStatus::Pending, Utc::now() - chrono::Duration::hours(1), 10)
        .await
        .unwrap();
    assert!(fresh.is_empty());

    store.mark_dispatched(&job.id, "run-1").await.unwrap();
    assert!(!store.claim_dispatch_attempt(&job.id, 1).await.unwrap());
    assert!(!store.record_dispatch_error(&job.id, "late").await.unwrap());
}

pub async fn transactions(store: &dyn Store) {
    let alice = user("alice");
    store.ensure_account(&alice, 0).await.unwrap();

    let tx = PaymentTransaction::pending(alice.clone(), 1999, 50, "pro");
    store.insert_transaction(&tx).await.unwrap();
    assert!(store.insert_transaction(&tx).await.is_err());

    assert_eq!(
        store.settle_transaction(&tx.id, Some("ord_1")).await.unwrap(),
        SettleOutcome::Applied {
            user_id: alice.clone(),
            credits: 50,
            balance: 50
        }
    );
    assert_eq!(
        store.settle_transaction(&tx.id, Some("ord_1")).await.unwrap(),
        SettleOutcome::AlreadyFinal {
            status: clipledger_core::TransactionStatus::Succeeded
        }
    );
    assert_eq!(store.get_account(&alice).await.unwrap().unwrap().balance, 50);

    let stored = store.get_transaction(&tx.id).await.unwrap().unwrap();
    assert_eq!(stored.external_ref.as_deref(), Some("ord_1"));
    assert!(!store.fail_transaction(&tx.id).await.unwrap());

    let abandoned = PaymentTransaction::pending(alice.clone(), 499, 10, "starter");
    store.insert_transaction(&abandoned).await.unwrap();
    assert!(store.fail_transaction(&abandoned.id).await.unwrap());
    assert!(matches!(
        store.settle_transaction(&abandoned.id, None).await.unwrap(),
        SettleOutcome::AlreadyFinal { .. }
    ));

    let unknown = PaymentTransaction::pending(alice.clone(), 499, 10, "starter");
    assert_eq!(
        store.settle_transaction(&unknown.id, None).await.unwrap(),
        SettleOutcome::Missing
    );

    assert_eq!(
        store
            .list_transactions_by_user(&alice, 10, 0)
            .await
            .unwrap()
            .len(),
        2
    );
}

pub async fn codes(store: &dyn Store) {
    let alice = user("alice");
    let bob = user("bob");
    store.ensure_account(&alice, 0).await.unwrap();
    store.ensure_account(&bob, 0).await.unwrap();

    assert!(store.insert_code(&RedemptionCode::new("WELCOME10", 10)).await.unwrap());
    assert!(!store.insert_code(&RedemptionCode::new("welcome10", 99)).await.unwrap());
    assert!(store.insert_code(&RedemptionCode::new("BIG50", 50)).await.unwrap());

    assert_eq!(
        store.claim_code("WELCOME10", &alice).await.unwrap(),
        ClaimOutcome::Claimed {
            credits: 10,
            balance: 10
        }
    );
    assert_eq!(
        store.claim_code("WELCOME10", &bob).await.unwrap(),
        ClaimOutcome::AlreadyClaimed
    );
    assert_eq!(
        store.claim_code("NOPE", &bob).await.unwrap(),
        ClaimOutcome::Missing
    );
    assert_eq!(store.get_account(&bob).await.unwrap().unwrap().balance, 0);

    let claimed = store.get_code("WELCOME10").await.unwrap().unwrap();
    assert_eq!(claimed.claimed_by, Some(alice));
    assert!(claimed.claimed_at.is_some());

    let redeemed = CodeFilter {
        state: Some(CodeState::Redeemed),
        ..CodeFilter::default()
    };
    assert_eq!(store.list_codes(&redeemed, 10, 0).await.unwrap().total, 1);
    let search = CodeFilter {
        search: Some("big".into()),
        ..CodeFilter::default()
    };
    let page = store.list_codes(&search, 10, 0).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].code, "BIG50");
}

pub async fn stats(store: &dyn Store) {
    let alice = user("alice");
    store.ensure_account(&alice, 3).await.unwrap();
    let job = job_for(&alice, Quality::Lama);
    store.create_job(&job).await.unwrap();
    store.complete_job(&job.id).await.unwrap();
    store.create_job(&job_for(&alice, Quality::Lama)).await.unwrap();
    store.insert_code(&RedemptionCode::new("A1", 1)).await.unwrap();
    store.insert_code(&RedemptionCode::new("A2", 1)).await.unwrap();
    store.claim_code("A1", &alice).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_users, 1);
    assert_eq!(stats.total_jobs, 2);
    assert_eq!(stats.completed_jobs, 1);
    assert_eq!(stats.pending_codes, 1);
    assert_eq!(stats.redeemed_codes, 1);
}

pub async fn concurrent_debits<S: Store + 'static>(store: Arc<S>) {
    let alice = user("alice");
    store.ensure_account(&alice, 10).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..30 {
        let store = Arc::clone(&store);
        let alice = alice.clone();
        handles.push(tokio::spawn(async move {
            if i % 6 == 0 {
                store.credit(&alice, 2).await.unwrap();
                false
            } else {
                matches!(
                    store.debit(&alice, 1).await.unwrap(),
                    DebitOutcome::Debited { .. }
                )
            }
        }));
    }

    let successful = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .filter(|debited| *debited)
        .count();

    let balance = store.get_account(&alice).await.unwrap().unwrap().balance;
    assert!(balance >= 0);
    assert_eq!(balance, 10 + 5 * 2 - i64::try_from(successful).unwrap());
}

pub async fn job_counts(store: &dyn Store) {
    let alice = user("alice");
    let bob = user("bob");
    let carol = user("carol");
    for u in [&alice, &bob, &carol] {
        store.ensure_account(u, 3).await.unwrap();
    }

    let done = job_for(&alice, Quality::Lama);
    store.create_job(&done).await.unwrap();
    store.complete_job(&done.id).await.unwrap();
    store.create_job(&job_for(&alice, Quality::Lama)).await.unwrap();
    store.create_job(&job_for(&bob, Quality::Lama)).await.unwrap();

    let counts = store
        .job_counts(&[alice.clone(), bob.clone(), carol.clone()])
        .await
        .unwrap();
    assert_eq!(
        counts.get(&alice).copied(),
        Some(JobCounts {
            total: 2,
            completed: 1
        })
    );
    assert_eq!(
        counts.get(&bob).copied(),
        Some(JobCounts {
            total: 1,
            completed: 0
        })
    );
    assert!(!counts.contains_key(&carol));

    // Only the requested users are counted.
    let only_bob = store.job_counts(&[bob.clone()]).await.unwrap();
    assert_eq!(only_bob.len(), 1);
    assert!(store.job_counts(&[]).await.unwrap().is_empty());
}

pub async fn balance_overflow(store: &dyn Store) {
    let alice = user("alice");
    store.ensure_account(&alice, 3).await.unwrap();

    assert!(matches!(
        store.credit(&alice, i64::MAX).await,
        Err(StoreError::Overflow)
    ));
    assert_eq!(store.get_account(&alice).await.unwrap().unwrap().balance, 3);

    // A code too large to apply stays unclaimed.
    store
        .insert_code(&RedemptionCode::new("HUGE", i64::MAX))
        .await
        .unwrap();
    assert!(matches!(
        store.claim_code("HUGE", &alice).await,
        Err(StoreError::Overflow)
    ));
    let code = store.get_code("HUGE").await.unwrap().unwrap();
    assert!(code.claimed_by.is_none());

    // The store keeps working afterwards.
    assert_eq!(store.credit(&alice, 1).await.unwrap(), 4);
}

pub async fn concurrent_claims<S: Store + 'static>(store: Arc<S>) {
    store
        .insert_code(&RedemptionCode::new("RACE10", 10))
        .await
        .unwrap();
    let users: Vec<UserId> = (0..8).map(|i| user(&format!("claimer-{i}"))).collect();
    for u in &users {
        store.ensure_account(u, 0).await.unwrap();
    }

    let handles = users.iter().cloned().map(|u| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.claim_code("RACE10", &u).await.unwrap() })
    });
    let outcomes: Vec<ClaimOutcome> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let winners = outcomes
        .iter()
        .filter(|o| matches!(o, ClaimOutcome::Claimed { credits: 10, .. }))
        .count();
    let losers = outcomes
        .iter()
        .filter(|o| **o == ClaimOutcome::AlreadyClaimed)
        .count();
    assert_eq!((winners, losers), (1, 7));

    let mut total = 0;
    for u in &users {
        total += store.get_account(u).await.unwrap().unwrap().balance;
    }
    assert_eq!(total, 10);
}

pub async fn concurrent_settlements<S: Store + 'static>(store: Arc<S>) {
    let alice = user("alice");
    store.ensure_account(&alice, 0).await.unwrap();
    let tx = PaymentTransaction::pending(alice.clone(), 1999, 50, "pro");
    store.insert_transaction(&tx).await.unwrap();

    let handles = (0..8).map(|_| {
        let store = Arc::clone(&store);
        let id = tx.id;
        tokio::spawn(async move { store.settle_transaction(&id, Some("ord_1")).await.unwrap() })
    });
    let applied = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .filter(|o| matches!(o, SettleOutcome::Applied { .. }))
        .count();

    assert_eq!(applied, 1);
    assert_eq!(store.get_account(&alice).await.unwrap().unwrap().balance, 50);
}

pub async fn concurrent_failures<S: Store + 'static>(store: Arc<S>) {
    let alice = user("alice");
    store.ensure_account(&alice, 3).await.unwrap();
    let job = job_for(&alice, Quality::E2fgviHq);
    store.create_job(&job).await.unwrap();
    store.mark_dispatched(&job.id, "run-1").await.unwrap();

    let handles = (0..8).map(|i| {
        let store = Arc::clone(&store);
        let id = job.id;
        tokio::spawn(async move {
            store
                .fail_job(&id, &JobStatus::ACTIVE, &format!("failure {i}"))
                .await
                .unwrap()
        })
    });
    let refunds = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .filter(Option::is_some)
        .count();

    assert_eq!(refunds, 1);
    assert_eq!(store.get_account(&alice).await.unwrap().unwrap().balance, 3);
    let failed = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
}
