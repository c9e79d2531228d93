//! Concurrency properties of stock reservation: no oversell, no partial
//! decrement, reservations and releases balance out.

use std::sync::Arc;

use checkout_api::services::inventory::{InMemoryInventory, InventoryStore, ReservationLine};

fn line(product: &str, quantity: u32) -> ReservationLine {
    ReservationLine {
        product_id: product.into(),
        quantity,
    }
}

#[tokio::test]
async fn concurrent_single_unit_reservations_never_oversell() {
    let inventory = Arc::new(InMemoryInventory::new());
    inventory.set_available("A", 10).await;

    // 20 concurrent reservations of 1 unit each; exactly 10 can win.
    let mut tasks = Vec::new();
    for _ in 0..20 {
        let inventory = inventory.clone();
        tasks.push(tokio::spawn(async move {
            inventory.reserve(&[line("A", 1)]).await.is_ok()
        }));
    }

    let mut success = 0;
    for task in tasks {
        if task.await.unwrap() {
            success += 1;
        }
    }
    assert_eq!(
        success, 10,
        "exactly 10 reservations should succeed; got {}",
        success
    );
    assert_eq!(inventory.available("A").await, Some(0));
}

#[tokio::test]
async fn concurrent_multi_line_reservations_stay_atomic() {
    let inventory = Arc::new(InMemoryInventory::new());
    inventory.set_available("A", 6).await;
    inventory.set_available("B", 4).await;

    // Each task wants one of each; only 4 can win (B is the bottleneck),
    // and no losing task may leave A partially decremented.
    let mut tasks = Vec::new();
    for _ in 0..10 {
        let inventory = inventory.clone();
        tasks.push(tokio::spawn(async move {
            inventory
                .reserve(&[line("A", 1), line("B", 1)])
                .await
                .is_ok()
        }));
    }

    let mut success = 0;
    for task in tasks {
        if task.await.unwrap() {
            success += 1;
        }
    }
    assert_eq!(success, 4);
    assert_eq!(inventory.available("A").await, Some(2));
    assert_eq!(inventory.available("B").await, Some(0));
}

#[tokio::test]
async fn interleaved_reserve_and_release_balances() {
    let inventory = Arc::new(InMemoryInventory::new());
    inventory.set_available("A", 5).await;

    let mut tasks = Vec::new();
    for _ in 0..25 {
        let inventory = inventory.clone();
        tasks.push(tokio::spawn(async move {
            if inventory.reserve(&[line("A", 1)]).await.is_ok() {
                tokio::task::yield_now().await;
                inventory.release(&[line("A", 1)]).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Every successful hold was compensated.
    assert_eq!(inventory.available("A").await, Some(5));
}
