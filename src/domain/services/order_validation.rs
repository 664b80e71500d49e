//! Pre-submission checks and price normalization for venue orders

use crate::domain::entities::order::{LegOrder, OrderTag, Side, TradeRequest};
use crate::domain::repositories::venue_client::{SymbolInfo, VenueError, VenueResult};

/// Round `price` to the symbol's tick, trimming float noise to `digits` decimals.
pub fn normalize_price(price: f64, info: &SymbolInfo) -> f64 {
    let tick = if info.tick_size > 0.0 {
        info.tick_size
    } else {
        info.point
    };
    let ticked = if tick > 0.0 {
        (price / tick).round() * tick
    } else {
        price
    };
    let scale = 10f64.powi(info.digits as i32);
    (ticked * scale).round() / scale
}

/// Price the SL/TP ordering is checked against: the requested entry for
/// pending orders, the current quote for market orders.
pub fn reference_price(trade: &TradeRequest, info: &SymbolInfo) -> VenueResult<f64> {
    if trade.order_type.is_market() {
        return Ok(info.market_price(trade.order_type.side()));
    }
    trade.entry_price.ok_or_else(|| {
        VenueError::InvalidOrder(format!(
            "{} on {} requires an entry price",
            trade.order_type, trade.symbol
        ))
    })
}

fn check_price(label: &str, value: f64) -> VenueResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(VenueError::InvalidOrder(format!("{} must be a positive price, got {}", label, value)))
    }
}

/// Validate side-consistent SL/TP ordering and minimum stop distance.
pub fn validate_trade(trade: &TradeRequest, volume: f64, info: &SymbolInfo) -> VenueResult<()> {
    if !volume.is_finite() || volume <= 0.0 {
        return Err(VenueError::InvalidOrder(format!("Invalid volume {}", volume)));
    }
    if let Some(entry) = trade.entry_price {
        check_price("Entry", entry)?;
    }

    let side = trade.order_type.side();
    let reference = reference_price(trade, info)?;
    check_price("Reference price", reference)?;
    let min_distance = info.min_stop_distance();

    if let Some(sl) = trade.stop_loss {
        check_price("Stop loss", sl)?;
        let wrong_side = match side {
            Side::Buy => sl >= reference,
            Side::Sell => sl <= reference,
        };
        if wrong_side {
            return Err(VenueError::InvalidOrder(format!(
                "{} stop loss {} must be {} {}",
                side,
                sl,
                if side == Side::Buy { "below" } else { "above" },
                reference
            )));
        }
        if (reference - sl).abs() < min_distance {
            return Err(VenueError::InvalidOrder(format!(
                "Stop loss {} is closer than {} to {}",
                sl, min_distance, reference
            )));
        }
    }

    for tp in &trade.take_profits {
        check_price("Take profit", *tp)?;
        let wrong_side = match side {
            Side::Buy => *tp <= reference,
            Side::Sell => *tp >= reference,
        };
        if wrong_side {
            return Err(VenueError::InvalidOrder(format!(
                "{} take profit {} must be {} {}",
                side,
                tp,
                if side == Side::Buy { "above" } else { "below" },
                reference
            )));
        }
        if (tp - reference).abs() < min_distance {
            return Err(VenueError::InvalidOrder(format!(
                "Take profit {} is closer than {} to {}",
                tp, min_distance, reference
            )));
        }
    }

    Ok(())
}

/// Validate the whole trade, then expand it into normalized legs.
pub fn build_legs(
    trade: &TradeRequest,
    volume_per_leg: f64,
    info: &SymbolInfo,
    tag: &OrderTag,
) -> VenueResult<Vec<LegOrder>> {
    validate_trade(trade, volume_per_leg, info)?;

    let price = if trade.order_type.is_market() {
        None
    } else {
        trade.entry_price.map(|p| normalize_price(p, info))
    };
    let stop_loss = trade.stop_loss.map(|p| normalize_price(p, info));

    Ok(trade
        .legs()
        .into_iter()
        .enumerate()
        .map(|(idx, tp)| LegOrder {
            symbol: trade.symbol.clone(),
            order_type: trade.order_type,
            volume: volume_per_leg,
            price,
            stop_loss,
            take_profit: tp.map(|p| normalize_price(p, info)),
            magic: tag.magic,
            comment: tag.comment(trade.signal_id, idx + 1),
        })
        .collect())
}
