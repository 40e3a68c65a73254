use anyhow::Result;
use googlenet::learn::neural_network::trainer::History;
use plotters::prelude::*;
use std::path::Path;

/// Draws the training loss and the train / test accuracy of each epoch to a png.
pub fn plot(path: &Path, history: &History) -> Result<()> {
    let series = |f: fn(&googlenet::learn::Summary) -> Option<f32>| -> Vec<(f32, f32)> {
        history
            .epochs
            .iter()
            .filter_map(|summary| Some((summary.epoch as f32, f(summary)?)))
            .collect()
    };
    let train_loss = series(|summary| summary.train.mean_loss());
    let train_acc = series(|summary| summary.train.accuracy());
    let test_acc = series(|summary| summary.test.accuracy());
    let y_max = train_loss
        .iter()
        .map(|(_, loss)| *loss)
        .filter(|loss| loss.is_finite())
        .fold(1f32, f32::max);
    let epochs = (history.epochs.len() as f32).max(2.);

    let root = BitMapBackend::new(path, (1024, 760)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("GoogLeNet on Fashion-MNIST", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(1f32..epochs, 0f32..y_max)?;
    chart
        .configure_mesh()
        .x_desc("epoch")
        .x_label_formatter(&|x| format!("{x:.0}"))
        .draw()?;
    for (name, color, points) in [
        ("train loss", &BLUE, train_loss),
        ("train acc", &RED, train_acc),
        ("test acc", &GREEN, test_acc),
    ] {
        chart
            .draw_series(LineSeries::new(points, color))?
            .label(name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}
